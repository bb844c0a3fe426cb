//! The signed license payload.
//!
//! Field names are part of the file format and serialize in camelCase.
//! Unknown fields are ignored on read; optional fields default as follows:
//! `features = []`, `fileHashes` absent, `enableIntegrity = true`,
//! `maxRunCount = -1` (unlimited), `currentRunCount = 0`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LicenseResult, ValidationError};

/// `maxRunCount` value meaning "no cap".
pub const UNLIMITED_RUNS: i64 = -1;

fn default_true() -> bool {
    true
}

fn default_max_run_count() -> i64 {
    UNLIMITED_RUNS
}

/// The decoded license payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicensePayload {
    /// Opaque unique token generated at issuance.
    pub license_id: String,
    /// When the license was issued.
    #[serde(alias = "issuedUtc")]
    pub issued_at: DateTime<Utc>,
    /// Last instant at which the license is valid.
    #[serde(alias = "expiresUtc")]
    pub expires_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the target machine's fingerprint.
    pub hwid_hash: String,
    /// Capability strings granted to the client.
    #[serde(default)]
    pub features: BTreeSet<String>,
    /// Relative path (forward slashes) to expected hex SHA-256.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hashes: Option<BTreeMap<String, String>>,
    /// Gates the environment and file integrity stages.
    #[serde(default = "default_true")]
    pub enable_integrity: bool,
    /// `-1` for unlimited, otherwise a cap on cumulative runs.
    #[serde(default = "default_max_run_count")]
    pub max_run_count: i64,
    /// Informational snapshot written at issuance.
    #[serde(default)]
    pub current_run_count: i64,
}

impl LicensePayload {
    /// Serializes to the canonical bytes that get signed.
    pub fn to_json_bytes(&self) -> LicenseResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses verified payload bytes and checks structural invariants.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let payload: Self = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::MalformedPayload(format!("invalid payload JSON: {e}")))?;
        payload.check()?;
        Ok(payload)
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.license_id.trim().is_empty() {
            return Err(ValidationError::MalformedPayload(
                "licenseId is empty".to_string(),
            ));
        }
        if self.hwid_hash.trim().is_empty() {
            return Err(ValidationError::MalformedPayload(
                "hwidHash is empty".to_string(),
            ));
        }
        if self.issued_at > self.expires_at {
            return Err(ValidationError::MalformedPayload(
                "issuedAt is after expiresAt".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the run cap, or `None` when runs are unlimited.
    #[must_use]
    pub fn run_cap(&self) -> Option<u64> {
        u64::try_from(self.max_run_count).ok()
    }

    /// Returns the file manifest when integrity checking applies.
    #[must_use]
    pub fn integrity_manifest(&self) -> Option<&BTreeMap<String, String>> {
        if !self.enable_integrity {
            return None;
        }
        self.file_hashes.as_ref().filter(|m| !m.is_empty())
    }

    /// Returns true if the license grants `feature`.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}
