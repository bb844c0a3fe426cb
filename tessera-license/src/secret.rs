//! Per-install random secret.
//!
//! 32 random bytes created on first use and kept in `install_secret.bin`,
//! wrapped by a [`ScopeProtector`] so a copied file is useless under another
//! account or host. The secret feeds the fingerprint, which makes cloned
//! installs distinguishable even on identical hardware.
//!
//! Storage failures never block the caller: an unreadable or unwrappable
//! file is replaced, and if nothing can be written the fresh secret is still
//! returned (the fingerprint then changes on the next process start).
//!
//! A new file is published with a hard link, which never replaces an
//! existing file, so concurrent first runs agree on the first complete write.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tessera_crypto::{fill_random, Passthrough, ScopeProtector, UserScope};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::LicenseResult;

/// Length of a freshly generated install secret.
pub const INSTALL_SECRET_LEN: usize = 32;

/// Longest secret accepted from disk.
const INSTALL_SECRET_MAX_LEN: usize = 64;

/// The per-install secret bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct InstallSecret(Vec<u8>);

impl InstallSecret {
    /// Generates a new random secret.
    pub fn generate() -> LicenseResult<Self> {
        let mut bytes = vec![0u8; INSTALL_SECRET_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Wraps existing bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex, the form mixed into the fingerprint material.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    fn is_plausible(bytes: &[u8]) -> bool {
        (INSTALL_SECRET_LEN..=INSTALL_SECRET_MAX_LEN).contains(&bytes.len())
    }
}

impl std::fmt::Debug for InstallSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InstallSecret").field(&"[REDACTED]").finish()
    }
}

/// Anything that can hand out the install secret.
pub trait SecretSource: Send + Sync {
    /// Returns the stored secret, creating it on first use.
    fn get_or_create(&self) -> LicenseResult<InstallSecret>;
}

/// A secret held in memory only.
#[derive(Debug, Clone)]
pub struct FixedSecret(InstallSecret);

impl FixedSecret {
    /// Serves `secret` on every call.
    #[must_use]
    pub fn new(secret: InstallSecret) -> Self {
        Self(secret)
    }
}

impl SecretSource for FixedSecret {
    fn get_or_create(&self) -> LicenseResult<InstallSecret> {
        Ok(self.0.clone())
    }
}

/// File-backed secret store.
pub struct SecretStore {
    path: PathBuf,
    protector: Box<dyn ScopeProtector>,
}

impl SecretStore {
    /// Creates a store at `path` using `protector` for the at-rest wrapping.
    pub fn new(path: impl Into<PathBuf>, protector: Box<dyn ScopeProtector>) -> Self {
        Self {
            path: path.into(),
            protector,
        }
    }

    /// Creates a store wrapped to the current OS user.
    pub fn user_scoped(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Box::new(UserScope::current()))
    }

    /// Creates a store that writes the secret unwrapped.
    pub fn unprotected(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Box::new(Passthrough))
    }

    /// Returns the secret file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_stored(&self) -> Stored {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => return Stored::Missing,
            Err(e) => {
                warn!("Install secret at {} unreadable: {}", self.path.display(), e);
                return Stored::Unusable;
            }
        };

        match self.protector.unprotect(&blob) {
            Ok(bytes) if InstallSecret::is_plausible(&bytes) => Stored::Valid(InstallSecret(bytes)),
            Ok(bytes) => {
                warn!(
                    "Install secret at {} has unexpected length {}",
                    self.path.display(),
                    bytes.len()
                );
                Stored::Unusable
            }
            Err(e) => {
                warn!("Install secret at {} could not be unwrapped: {}", self.path.display(), e);
                Stored::Unusable
            }
        }
    }

    fn read_valid(&self) -> Option<InstallSecret> {
        match self.read_stored() {
            Stored::Valid(secret) => Some(secret),
            Stored::Missing | Stored::Unusable => None,
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()))
    }

    /// Writes `blob` to a private temp file and runs `install` on it. The
    /// temp file is removed afterwards whatever the outcome.
    fn via_temp_file<T>(
        &self,
        blob: &[u8],
        install: impl FnOnce(&Path) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        let result = write_synced(&tmp, blob).and_then(|()| install(&tmp));
        if let Err(e) = fs::remove_file(&tmp)
            && e.kind() != ErrorKind::NotFound
        {
            debug!("Failed to remove {}: {}", tmp.display(), e);
        }
        result
    }

    /// Publishes a complete file at the secret path only if none exists.
    /// Returns false if another writer got there first.
    fn publish_new(&self, blob: &[u8]) -> std::io::Result<bool> {
        self.via_temp_file(blob, |tmp| match fs::hard_link(tmp, &self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        })
    }

    /// Overwrites an unusable secret file.
    fn replace(&self, blob: &[u8]) -> std::io::Result<()> {
        self.via_temp_file(blob, |tmp| fs::rename(tmp, &self.path))
    }
}

/// What the secret file held when it was read.
enum Stored {
    Missing,
    Unusable,
    Valid(InstallSecret),
}

fn write_synced(path: &Path, blob: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(blob)?;
    file.sync_all()
}

impl SecretSource for SecretStore {
    fn get_or_create(&self) -> LicenseResult<InstallSecret> {
        let previous = match self.read_stored() {
            Stored::Valid(secret) => return Ok(secret),
            other => other,
        };

        let secret = InstallSecret::generate()?;
        let blob = match self.protector.protect(secret.as_bytes()) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Install secret could not be wrapped, not persisting: {}", e);
                return Ok(secret);
            }
        };

        if let Stored::Unusable = previous {
            return match self.replace(&blob) {
                Ok(()) => {
                    info!("Regenerated install secret at {}", self.path.display());
                    Ok(self.read_valid().unwrap_or(secret))
                }
                Err(e) => {
                    warn!("Failed to replace install secret at {}: {}", self.path.display(), e);
                    Ok(secret)
                }
            };
        }

        match self.publish_new(&blob) {
            Ok(true) => {
                info!("Created install secret at {}", self.path.display());
                Ok(secret)
            }
            Ok(false) => {
                debug!("Install secret created concurrently, using stored copy");
                Ok(self.read_valid().unwrap_or(secret))
            }
            Err(e) => {
                warn!("Failed to persist install secret at {}: {}", self.path.display(), e);
                Ok(secret)
            }
        }
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("path", &self.path).finish()
    }
}
