//! Device enrollment against the tenant IoT bridge.
//!
//! `enroll()` walks the provisioning pipeline once:
//!
//! 1. idempotency check (marker present → done, nothing touched)
//! 2. EC P-256 key pair generation, persisted before anything else
//! 3. PKCS#10 CSR construction
//! 4. POST to `{BRIDGE_API_URL}/v1/enroll` (30 s timeout, 200 required)
//! 5. field-anchored extraction of `certificate` / `ca_chain`
//! 6. certificate + chain persistence, then the marker as the commit
//!
//! Any failure in steps 2-6 leaves the marker absent, so the next call
//! re-attempts full provisioning, including a fresh key pair; a key
//! whose CSR submission failed is never resubmitted.

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ENROLL_TIMEOUT};
use crate::csr::device_csr;
use crate::error::EnrollError;
use crate::json::extract_string_field;
use crate::store::CredentialStore;

/// JSON body of the enrollment POST. Transient; serde escapes the PEM
/// newlines in `csr` as `\n` on the wire.
#[derive(Serialize)]
struct EnrollmentRequest<'a> {
    device_id: &'a str,
    device_type: &'a str,
    csr: &'a str,
}

/// Orchestrates one-time device provisioning.
pub struct EnrollmentEngine {
    config: AgentConfig,
    store: CredentialStore,
    http: reqwest::Client,
}

impl EnrollmentEngine {
    /// Create an enrollment engine for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AgentConfig, store: CredentialStore) -> Result<Self, EnrollError> {
        let http = reqwest::Client::builder()
            .timeout(ENROLL_TIMEOUT)
            .user_agent(crate::USER_AGENT)
            .build()?;

        Ok(Self {
            config,
            store,
            http,
        })
    }

    /// Run the enrollment pipeline. Idempotent: a device that already
    /// holds the completion marker returns success immediately, with no
    /// key generation and no network traffic.
    pub async fn enroll(&self) -> Result<(), EnrollError> {
        if self.store.is_enrolled() {
            info!("already enrolled, skipping");
            return Ok(());
        }

        let identity = &self.config.device;
        info!(
            device_id = %identity.device_id,
            tenant_id = %identity.tenant_id,
            "enrolling device"
        );

        // Key + CSR. The key is durable before the CSR leaves the
        // process; losing the exchange must not lose the key mid-flight.
        debug!("generating EC P-256 key pair");
        let (csr_pem, key_pair) = device_csr(identity)?;
        let key_pem = key_pair.serialize_pem();
        self.store
            .save_key(key_pem.as_bytes())
            .map_err(|e| EnrollError::persist(self.store.key_path(), e))?;
        debug!(path = %self.store.key_path().display(), "device key written");
        // The store owns the key from here; the channel loads it by path.
        drop(key_pair);

        // Enrollment exchange.
        let response = self
            .http
            .post(self.config.enroll_url.clone())
            .json(&EnrollmentRequest {
                device_id: &identity.device_id,
                device_type: &identity.device_type,
                csr: &csr_pem,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "bridge rejected enrollment");
            return Err(EnrollError::bridge(status.as_u16(), snippet(&body)));
        }

        // Response validation: exactly two string fields, unescaped
        // back to real newlines during extraction.
        let certificate = extract_string_field(&body, "certificate")
            .ok_or_else(|| EnrollError::response_parse("missing field `certificate`"))?;
        let ca_chain = extract_string_field(&body, "ca_chain")
            .ok_or_else(|| EnrollError::response_parse("missing field `ca_chain`"))?;

        // Persist, then commit with the marker.
        self.store
            .save_certificate(certificate.as_bytes())
            .map_err(|e| EnrollError::persist(self.store.certificate_path(), e))?;
        self.store
            .save_ca_chain(ca_chain.as_bytes())
            .map_err(|e| EnrollError::persist(self.store.ca_chain_path(), e))?;
        self.store
            .mark_enrolled()
            .map_err(|e| EnrollError::persist(self.store.marker_path(), e))?;

        info!("enrollment complete");
        Ok(())
    }
}

/// Trim a response body to a loggable diagnostic.
fn snippet(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
