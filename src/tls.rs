//! TLS configuration for the broker session.
//!
//! The telemetry channel trusts exactly the CA chain issued during
//! enrollment (never the public web PKI) and authenticates with the
//! issued device certificate. rustls' safe defaults restrict the session
//! to TLS 1.2/1.3 with modern AEAD cipher suites; no legacy ciphers are
//! reachable through this configuration.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::ChannelError;
use crate::store::CredentialBundle;

/// Build a rustls client configuration from the persisted credentials.
///
/// Trust is anchored at the enrolled CA chain; the device certificate
/// and key provide client authentication.
///
/// # Errors
///
/// PEM parse failures surface as [`ChannelError::CredentialLoad`];
/// a certificate/key pair rustls rejects surfaces as
/// [`ChannelError::TlsHandshake`].
pub fn build_client_tls(bundle: &CredentialBundle) -> Result<Arc<ClientConfig>, ChannelError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_pem_certificates(&bundle.ca_chain_pem)? {
        roots
            .add(cert)
            .map_err(|e| ChannelError::credential_load(format!("bad CA certificate: {e}")))?;
    }

    let certs = parse_pem_certificates(&bundle.cert_pem)?;
    let key = parse_pem_private_key(&bundle.key_pem)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ChannelError::tls_handshake(format!("client auth rejected: {e}")))?;

    Ok(Arc::new(config))
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(
    pem_data: &[u8],
) -> Result<Vec<CertificateDer<'static>>, ChannelError> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(ChannelError::credential_load(
            "no certificates found in PEM data",
        ));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key (PKCS#8, PKCS#1, or SEC1).
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>, ChannelError> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => {
                // Skip non-key PEM items.
                continue;
            }
            Ok(None) => break,
            Err(e) => {
                return Err(ChannelError::credential_load(format!(
                    "failed to parse PEM: {e}"
                )));
            }
        }
    }

    Err(ChannelError::credential_load(
        "no private key found in PEM data",
    ))
}
