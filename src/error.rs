//! Error types for the device agent.
//!
//! Enrollment and channel establishment carry separate taxonomies because
//! they fail differently: an enrollment error is terminal for the attempt
//! (the caller decides whether the process can continue), while a channel
//! error only aborts the current connect cycle and is always retried by
//! the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during device enrollment.
///
/// None of these are retried internally; a failed `enroll()` leaves the
/// credential store unmarked so a later call re-attempts full
/// provisioning from a fresh key pair.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// Key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGen(String),

    /// CSR construction or serialization failed.
    #[error("CSR generation failed: {0}")]
    CsrBuild(String),

    /// The enrollment POST could not be sent or the response could not
    /// be read (connection refused, DNS, timeout).
    #[error("enrollment request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with a non-200 status.
    #[error("bridge returned HTTP {status}: {body}")]
    Bridge {
        /// HTTP status code.
        status: u16,
        /// Response body (may be empty), kept for diagnostics.
        body: String,
    },

    /// The enrollment response did not contain the expected fields.
    #[error("invalid enrollment response: {0}")]
    ResponseParse(String),

    /// Writing credential material to the store failed.
    #[error("failed to persist {path}: {source}")]
    Persist {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl EnrollError {
    /// Create a key generation error with the given message.
    pub fn key_gen(msg: impl Into<String>) -> Self {
        Self::KeyGen(msg.into())
    }

    /// Create a CSR construction error with the given message.
    pub fn csr_build(msg: impl Into<String>) -> Self {
        Self::CsrBuild(msg.into())
    }

    /// Create a bridge error with status and response body.
    pub fn bridge(status: u16, body: impl Into<String>) -> Self {
        Self::Bridge {
            status,
            body: body.into(),
        }
    }

    /// Create a response parse error with the given message.
    pub fn response_parse(msg: impl Into<String>) -> Self {
        Self::ResponseParse(msg.into())
    }

    /// Create a persistence error for the given path.
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the failure happened during the network exchange
    /// (as opposed to local key/CSR/persistence work).
    pub fn is_exchange_failure(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Bridge { .. } | Self::ResponseParse(_))
    }
}

/// Errors that can occur during one telemetry channel cycle.
///
/// All variants abort the current cycle only. The orchestrator retries
/// after a fixed delay; nothing here is fatal to the process.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Credential files could not be read or parsed.
    #[error("credential load failed: {0}")]
    CredentialLoad(String),

    /// The TCP connection to the broker could not be established.
    #[error("TCP connect failed: {0}")]
    TcpConnect(String),

    /// The TLS handshake with the broker failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// The broker rejected or never acknowledged the MQTT CONNECT.
    #[error("MQTT connect failed: {0}")]
    ProtocolConnect(String),

    /// The telemetry publish failed.
    ///
    /// Non-fatal to the cycle: the caller logs it and still disconnects.
    #[error("publish failed: {0}")]
    Publish(String),
}

impl ChannelError {
    /// Create a credential load error with the given message.
    pub fn credential_load(msg: impl Into<String>) -> Self {
        Self::CredentialLoad(msg.into())
    }

    /// Create a TCP connect error with the given message.
    pub fn tcp_connect(msg: impl Into<String>) -> Self {
        Self::TcpConnect(msg.into())
    }

    /// Create a TLS handshake error with the given message.
    pub fn tls_handshake(msg: impl Into<String>) -> Self {
        Self::TlsHandshake(msg.into())
    }

    /// Create a protocol connect error with the given message.
    pub fn protocol_connect(msg: impl Into<String>) -> Self {
        Self::ProtocolConnect(msg.into())
    }

    /// Create a publish error with the given message.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }
}

/// Errors raised while assembling the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("{0} is not set")]
    MissingVar(&'static str),

    /// A URL-valued variable did not parse.
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        /// Variable name.
        var: &'static str,
        /// Parse failure.
        source: url::ParseError,
    },

    /// A port-valued variable did not parse.
    #[error("{var} is not a valid port: {value}")]
    InvalidPort {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
