//! Issuer side: building and signing license payloads.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::device::hwid_hash;
use crate::envelope::LicenseEnvelope;
use crate::error::{LicenseError, LicenseResult};
use crate::key::IssuerKeyPair;
use crate::payload::{LicensePayload, UNLIMITED_RUNS};

/// Signs `payload` and wraps it in an envelope.
///
/// The signature covers the exact serialized bytes stored in the envelope,
/// so clients verify without re-serializing.
pub fn sign(payload: &LicensePayload, key: &IssuerKeyPair) -> LicenseResult<LicenseEnvelope> {
    let payload_bytes = payload.to_json_bytes()?;
    let signature = key.sign_bytes(&payload_bytes);
    Ok(LicenseEnvelope::from_parts(&payload_bytes, &signature))
}

/// Builder for a new license bound to one machine.
#[derive(Debug, Clone)]
pub struct LicenseBuilder {
    fingerprint: String,
    expires_at: DateTime<Utc>,
    issued_at: Option<DateTime<Utc>>,
    features: BTreeSet<String>,
    file_hashes: Option<BTreeMap<String, String>>,
    enable_integrity: bool,
    max_run_count: i64,
}

impl LicenseBuilder {
    /// Starts a license for the machine whose code the user sent in.
    pub fn new(fingerprint: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            expires_at,
            issued_at: None,
            features: BTreeSet::new(),
            file_hashes: None,
            enable_integrity: true,
            max_run_count: UNLIMITED_RUNS,
        }
    }

    /// Overrides the issue time (defaults to now).
    #[must_use]
    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    /// Grants capability strings. Blank entries are dropped.
    #[must_use]
    pub fn features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(
            features
                .into_iter()
                .map(Into::into)
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        );
        self
    }

    /// Attaches a file integrity manifest.
    #[must_use]
    pub fn file_hashes(mut self, manifest: BTreeMap<String, String>) -> Self {
        self.file_hashes = Some(manifest);
        self
    }

    /// Enables or disables the environment and integrity stages.
    #[must_use]
    pub fn enable_integrity(mut self, enabled: bool) -> Self {
        self.enable_integrity = enabled;
        self
    }

    /// Caps cumulative runs; `-1` means unlimited.
    #[must_use]
    pub fn max_run_count(mut self, max: i64) -> Self {
        self.max_run_count = max;
        self
    }

    /// Produces the payload, enforcing issuance invariants.
    pub fn build(self) -> LicenseResult<LicensePayload> {
        let fingerprint = self.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(LicenseError::InvalidArgument(
                "hardware code must not be empty".to_string(),
            ));
        }
        if self.max_run_count < UNLIMITED_RUNS {
            return Err(LicenseError::InvalidArgument(format!(
                "max run count must be -1 or non-negative, got {}",
                self.max_run_count
            )));
        }

        let issued_at = self.issued_at.unwrap_or_else(Utc::now);
        if self.expires_at < issued_at {
            return Err(LicenseError::InvalidArgument(format!(
                "expiry {} is before issue time {issued_at}",
                self.expires_at
            )));
        }

        Ok(LicensePayload {
            license_id: Uuid::new_v4().simple().to_string(),
            issued_at,
            expires_at: self.expires_at,
            hwid_hash: hwid_hash(fingerprint),
            features: self.features,
            file_hashes: self.file_hashes,
            enable_integrity: self.enable_integrity,
            max_run_count: self.max_run_count,
            current_run_count: 0,
        })
    }

    /// Builds and signs in one step.
    pub fn sign(self, key: &IssuerKeyPair) -> LicenseResult<(LicensePayload, LicenseEnvelope)> {
        let payload = self.build()?;
        let envelope = sign(&payload, key)?;
        info!(
            "Issued license {} (expires {}, {} feature(s))",
            payload.license_id,
            payload.expires_at,
            payload.features.len()
        );
        Ok((payload, envelope))
    }
}
