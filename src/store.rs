//! Filesystem-backed credential store.
//!
//! The store owns a fixed layout under the configured certificate
//! directory:
//!
//! - `device-key.pem`: device private key (mode 0600 on Unix)
//! - `device.pem`: issued device certificate
//! - `ca-chain.pem`: issuing CA chain
//! - `.enrolled`: zero-length marker, written last
//!
//! The marker is the commit point of enrollment: it exists iff all three
//! PEM files were fully written. Every write lands in a temp file in the
//! same directory and is renamed into place, so a crash mid-write never
//! leaves a truncated PEM (or a marker that lies about the bundle).
//!
//! The enrollment task is the only writer; after the marker appears the
//! channel task reads the files and never modifies them.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// File name of the device private key.
pub const KEY_FILE: &str = "device-key.pem";

/// File name of the issued device certificate.
pub const CERT_FILE: &str = "device.pem";

/// File name of the CA chain.
pub const CA_CHAIN_FILE: &str = "ca-chain.pem";

/// File name of the enrollment marker.
pub const MARKER_FILE: &str = ".enrolled";

/// The persisted credential triple, loaded for channel establishment.
#[derive(Debug, Clone)]
pub struct CredentialBundle {
    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
    /// PEM-encoded device certificate.
    pub cert_pem: Vec<u8>,
    /// PEM-encoded CA chain.
    pub ca_chain_pem: Vec<u8>,
}

/// Handle to the on-disk credential layout.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`. The directory is created lazily
    /// on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the private key file.
    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    /// Path of the device certificate file.
    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    /// Path of the CA chain file.
    pub fn ca_chain_path(&self) -> PathBuf {
        self.dir.join(CA_CHAIN_FILE)
    }

    /// Path of the enrollment marker.
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    /// Whether the enrollment marker is present.
    pub fn is_enrolled(&self) -> bool {
        self.marker_path().exists()
    }

    /// Persist the private key (restrictive permissions on Unix).
    pub fn save_key(&self, pem: &[u8]) -> io::Result<()> {
        self.write_replace(&self.key_path(), pem, true)
    }

    /// Persist the device certificate.
    pub fn save_certificate(&self, pem: &[u8]) -> io::Result<()> {
        self.write_replace(&self.certificate_path(), pem, false)
    }

    /// Persist the CA chain.
    pub fn save_ca_chain(&self, pem: &[u8]) -> io::Result<()> {
        self.write_replace(&self.ca_chain_path(), pem, false)
    }

    /// Write the enrollment marker. Must be the last step of a
    /// successful enrollment.
    pub fn mark_enrolled(&self) -> io::Result<()> {
        self.write_replace(&self.marker_path(), b"", false)
    }

    /// Load the credential triple.
    ///
    /// # Errors
    ///
    /// Fails if any of the three files is missing or unreadable.
    pub fn load(&self) -> io::Result<CredentialBundle> {
        Ok(CredentialBundle {
            key_pem: fs::read(self.key_path())?,
            cert_pem: fs::read(self.certificate_path())?,
            ca_chain_pem: fs::read(self.ca_chain_path())?,
        })
    }

    /// Write `data` to `path` via a temp file + rename in the same
    /// directory.
    fn write_replace(&self, path: &Path, data: &[u8], restrict: bool) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad store path"))?;
        let tmp = self.dir.join(format!("{file_name}.tmp"));

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if restrict {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = restrict;

        let mut file = options.open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = data.len(), "credential file written");
        Ok(())
    }
}
