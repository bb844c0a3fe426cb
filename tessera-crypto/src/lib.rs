//! Cryptographic building blocks for Tessera.
//!
//! - ChaCha20-Poly1305 sealing of small blobs (license file at rest)
//! - Argon2id and SHA-256 key derivation
//! - User-scoped protection for the per-install secret
//! - Constant-time comparison

mod cipher;
mod ct;
mod error;
mod key;
mod scope;

pub use cipher::{decrypt, encrypt, open, seal, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use ct::{fixed_time_eq, fixed_time_eq_str};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, digest_key, fill_random, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE,
};
pub use scope::{Passthrough, ScopeIdentity, ScopeProtector, UserScope, SCOPE_BLOB_VERSION};
