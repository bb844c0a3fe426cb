//! The installed license file.
//!
//! In sealed mode the envelope JSON is encrypted with a key derived from the
//! machine fingerprint, so a license file copied to another machine is
//! unreadable there. A plaintext envelope (first byte `{`) is always
//! accepted, which lets users drop the issued file in place by hand.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tessera_crypto::{digest_key, open, seal, DerivedKey};
use tracing::{debug, warn};

use crate::device::Fingerprint;
use crate::error::{LicenseError, LicenseResult};

const LICENSE_KEY_TAG: &[u8] = b"tessera-license-file";

/// Reads and writes the license file at a fixed path.
pub struct LicenseStore {
    path: PathBuf,
    key: Option<DerivedKey>,
}

impl LicenseStore {
    /// A store that keeps the envelope JSON as-is.
    pub fn plain(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
        }
    }

    /// A store that seals the envelope under a fingerprint-derived key.
    pub fn sealed(path: impl Into<PathBuf>, fingerprint: &Fingerprint) -> Self {
        Self {
            path: path.into(),
            key: Some(digest_key(&[fingerprint.as_str().as_bytes(), LICENSE_KEY_TAG])),
        }
    }

    /// Returns the license file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the store encrypts on save.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.key.is_some()
    }

    /// Writes the envelope JSON, replacing any previous license.
    pub fn save(&self, envelope_json: &str) -> LicenseResult<()> {
        let bytes = match &self.key {
            Some(key) => seal(key, envelope_json.as_bytes())?,
            None => envelope_json.as_bytes().to_vec(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("dat.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!("License written to {}", self.path.display());
        Ok(())
    }

    /// Reads the envelope JSON. Returns `None` if nothing usable is stored.
    pub fn load(&self) -> LicenseResult<Option<String>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Some(key) = &self.key {
            match open(key, &bytes) {
                Ok(plain) => {
                    return String::from_utf8(plain).map(Some).map_err(|e| {
                        LicenseError::Storage(format!("license file is not UTF-8: {e}"))
                    });
                }
                Err(e) if !looks_like_json(&bytes) => {
                    warn!(
                        "License at {} could not be opened on this machine: {}",
                        self.path.display(),
                        e
                    );
                    return Ok(None);
                }
                Err(_) => debug!("License at {} is plain JSON", self.path.display()),
            }
        }

        match String::from_utf8(bytes) {
            Ok(text) if looks_like_json(text.as_bytes()) => Ok(Some(text)),
            _ => {
                warn!("License at {} is not plain JSON", self.path.display());
                Ok(None)
            }
        }
    }

    /// Deletes the license file. Returns true if one existed.
    pub fn remove(&self) -> LicenseResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

impl std::fmt::Debug for LicenseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseStore")
            .field("path", &self.path)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
