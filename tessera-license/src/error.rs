//! Error types for the licensing crate.
//!
//! [`ValidationError`] is the closed set of outcomes the validator can
//! report. [`LicenseError`] covers everything else (key handling, issuance,
//! configuration, storage plumbing).

use chrono::{DateTime, Utc};
use tessera_crypto::CryptoError;
use thiserror::Error;

use crate::integrity::{IntegrityFailure, IntegrityReason};

/// Why a license failed validation. Stages are listed in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// License file is not a JSON envelope or lacks payload/signature.
    #[error("license file is malformed: {0}")]
    MalformedEnvelope(String),

    /// Payload or signature is not valid base64url.
    #[error("license payload/signature encoding is invalid: {0}")]
    MalformedEncoding(String),

    /// Signature does not verify against the embedded public key.
    #[error("license signature invalid (edited or not issued by this vendor)")]
    InvalidSignature,

    /// Signed payload is not a valid license payload.
    #[error("license payload is invalid: {0}")]
    MalformedPayload(String),

    /// License has expired.
    #[error("license expired on {0}")]
    Expired(DateTime<Utc>),

    /// License was issued for a different machine.
    #[error("hardware id mismatch (license not issued for this machine)")]
    HwidMismatch,

    /// A debugger, hypervisor or analysis tool was detected.
    #[error("environment violation: {0}")]
    EnvironmentViolation(String),

    /// The license has been run more often than it allows.
    #[error("run limit exceeded ({count} runs, max {max})")]
    RunLimitExceeded { count: u64, max: u64 },

    /// An installed file is missing or modified.
    #[error("integrity violation: {path}: {reason}")]
    IntegrityViolation {
        path: String,
        reason: IntegrityReason,
    },

    /// Local state (install secret, run counts) could not be persisted.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ValidationError {
    /// Stable label for logs and exit-code mapping.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::MalformedEncoding(_) => "malformed_encoding",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::Expired(_) => "expired",
            Self::HwidMismatch => "hwid_mismatch",
            Self::EnvironmentViolation(_) => "environment_violation",
            Self::RunLimitExceeded { .. } => "run_limit_exceeded",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<IntegrityFailure> for ValidationError {
    fn from(failure: IntegrityFailure) -> Self {
        Self::IntegrityViolation {
            path: failure.path,
            reason: failure.reason,
        }
    }
}

/// Licensing-specific errors outside the validation pipeline.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// A validation stage rejected the license.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Signing or verifying key could not be imported or exported.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Caller supplied an out-of-range or inconsistent value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be loaded or resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local state could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Underlying crypto failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
