//! User-scoped protection for small secrets at rest.
//!
//! Consumers (the install-secret store) depend on `dyn ScopeProtector` and
//! never see the wrapping key. [`UserScope`] derives that key from the
//! identity of the current OS user; [`Passthrough`] leaves data unchanged and
//! exists for tests.
//!
//! `UserScope` is a locally derived key-wrapping scheme, not a keychain or TPM
//! seal. A copied blob will not open under another account or on another
//! host, but any process running as the same user can re-derive the key.

use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, SALT_SIZE};
use tracing::debug;

/// Layout version byte at the front of every `UserScope` blob.
pub const SCOPE_BLOB_VERSION: u8 = 1;

const DOMAIN_TAG: &str = "tessera/user-scope/v1";

/// Encrypts and decrypts opaque byte slices under a scope-owned key.
pub trait ScopeProtector: Send + Sync {
    /// Wraps `data` so that only the same scope can recover it.
    fn protect(&self, data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Recovers data produced by [`ScopeProtector::protect`].
    fn unprotect(&self, blob: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// No-op protector. Data passes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ScopeProtector for Passthrough {
    fn protect(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn unprotect(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(blob.to_vec())
    }
}

/// The identity attributes a user scope is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeIdentity {
    /// Login name of the current user.
    pub user: String,
    /// Home directory of the current user.
    pub home: String,
    /// Host name of the machine.
    pub host: String,
}

impl ScopeIdentity {
    /// Reads the identity of the current process owner.
    pub fn current() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "no-user".to_string());
        let home = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "no-home".to_string());
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "no-host".to_string());
        Self { user, home, host }
    }

    fn material(&self) -> Vec<u8> {
        format!("{DOMAIN_TAG}|{}|{}|{}", self.user, self.home, self.host).into_bytes()
    }
}

/// Protector keyed to the current OS user.
///
/// Blob layout: `version(1) || salt(16) || nonce(12) || ciphertext`.
#[derive(Debug, Clone)]
pub struct UserScope {
    identity: ScopeIdentity,
    params: KdfParams,
}

impl UserScope {
    /// Binds to the current process owner with default KDF parameters.
    pub fn current() -> Self {
        Self::with_identity(ScopeIdentity::current(), KdfParams::default())
    }

    /// Binds to an explicit identity.
    pub fn with_identity(identity: ScopeIdentity, params: KdfParams) -> Self {
        Self { identity, params }
    }

    /// Returns the identity this scope is bound to.
    pub fn identity(&self) -> &ScopeIdentity {
        &self.identity
    }
}

impl ScopeProtector for UserScope {
    fn protect(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let salt = Salt::random()?;
        let key = derive_key(&self.identity.material(), &salt, &self.params)?;
        let sealed = cipher::seal(&key, data)?;

        let mut blob = Vec::with_capacity(1 + SALT_SIZE + sealed.len());
        blob.push(SCOPE_BLOB_VERSION);
        blob.extend_from_slice(salt.as_bytes());
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn unprotect(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        let (version, rest) = blob
            .split_first()
            .ok_or_else(|| CryptoError::Malformed("empty blob".to_string()))?;
        if *version != SCOPE_BLOB_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported blob version {version}"
            )));
        }
        if rest.len() < SALT_SIZE {
            return Err(CryptoError::Malformed("blob too short".to_string()));
        }

        let mut salt_bytes = [0u8; SALT_SIZE];
        salt_bytes.copy_from_slice(&rest[..SALT_SIZE]);
        let key = derive_key(
            &self.identity.material(),
            &Salt::from_bytes(salt_bytes),
            &self.params,
        )?;
        debug!("unsealing user-scoped blob ({} bytes)", blob.len());
        cipher::open(&key, &rest[SALT_SIZE..])
    }
}
