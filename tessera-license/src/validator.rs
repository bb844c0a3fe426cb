//! Client-side license validation.
//!
//! Stages run in a fixed order and the first failure wins:
//!
//! 1. envelope parse → 2. base64url decode → 3. signature → 4. payload parse
//! → 5. expiry → 6. machine binding → 7. environment (if integrity enabled)
//! → 8. run count (if capped) → 9. file integrity and process scan.
//!
//! Stages 1–6 are pure. Stage 8 persists an increment even when the license
//! is then rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_crypto::fixed_time_eq_str;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::device::{check_fingerprint_length, hwid_hash, Fingerprint, FingerprintProvider};
use crate::envelope::LicenseEnvelope;
use crate::error::{LicenseError, LicenseResult, ValidationError};
use crate::integrity;
use crate::key::LicensePublicKey;
use crate::payload::LicensePayload;
use crate::run_counter::RunCounter;
use crate::secret::SecretStore;
use crate::sentinel::EnvironmentSentinel;
use crate::store::LicenseStore;

/// Validates license files for this machine.
#[derive(Debug)]
pub struct Validator {
    public_key: LicensePublicKey,
    fingerprints: FingerprintProvider,
    fingerprint_length: usize,
    sentinel: EnvironmentSentinel,
    run_counter: RunCounter,
    install_dir: PathBuf,
}

impl Validator {
    /// Starts building a validator around the vendor's public key.
    pub fn builder(public_key: LicensePublicKey) -> ValidatorBuilder {
        ValidatorBuilder {
            public_key,
            fingerprints: None,
            fingerprint_length: crate::device::DEFAULT_FINGERPRINT_LEN,
            sentinel: None,
            run_counter: None,
            install_dir: None,
        }
    }

    /// Wires a validator to host probes and the configured state files.
    pub fn from_config(
        public_key: LicensePublicKey,
        config: &ClientConfig,
        install_dir: impl Into<PathBuf>,
    ) -> LicenseResult<Self> {
        config.check()?;
        let layout = config.layout()?;
        let secret = Arc::new(SecretStore::user_scoped(layout.secret_path));
        Self::builder(public_key)
            .fingerprints(FingerprintProvider::host(secret))
            .fingerprint_length(config.fingerprint_length)
            .sentinel(EnvironmentSentinel::host())
            .run_counter(RunCounter::new(layout.run_count_path))
            .install_dir(install_dir)
            .build()
    }

    /// This machine's fingerprint at the configured length.
    pub fn local_fingerprint(&self) -> LicenseResult<Fingerprint> {
        self.fingerprints.get(self.fingerprint_length)
    }

    /// The run counter this validator increments.
    #[must_use]
    pub fn run_counter(&self) -> &RunCounter {
        &self.run_counter
    }

    /// Directory that integrity manifest paths are relative to.
    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Validates `license_json` against the current time.
    pub fn validate(&self, license_json: &str) -> Result<LicensePayload, ValidationError> {
        self.validate_at(license_json, Utc::now())
    }

    /// Validates the license held by `store`.
    pub fn validate_stored(&self, store: &LicenseStore) -> Result<LicensePayload, ValidationError> {
        let json = store
            .load()
            .map_err(|e| self.reject(ValidationError::StorageUnavailable(e.to_string())))?
            .ok_or_else(|| {
                self.reject(ValidationError::MalformedEnvelope(format!(
                    "no license installed at {}",
                    store.path().display()
                )))
            })?;
        self.validate(&json)
    }

    /// Validates `license_json` as if the current time were `now`.
    pub fn validate_at(
        &self,
        license_json: &str,
        now: DateTime<Utc>,
    ) -> Result<LicensePayload, ValidationError> {
        match self.run_stages(license_json, now) {
            Ok(payload) => {
                info!(
                    "License {} valid (expires {}, {} feature(s))",
                    payload.license_id,
                    payload.expires_at,
                    payload.features.len()
                );
                Ok(payload)
            }
            Err(e) => Err(self.reject(e)),
        }
    }

    fn reject(&self, error: ValidationError) -> ValidationError {
        warn!("License rejected [{}]: {}", error.kind(), error);
        error
    }

    fn run_stages(
        &self,
        license_json: &str,
        now: DateTime<Utc>,
    ) -> Result<LicensePayload, ValidationError> {
        let envelope = LicenseEnvelope::parse(license_json)?;
        let (payload_bytes, signature) = envelope.decode()?;

        if !self.public_key.verify(&payload_bytes, &signature) {
            return Err(ValidationError::InvalidSignature);
        }
        let payload = LicensePayload::from_json_bytes(&payload_bytes)?;
        debug!("License {} signature verified", payload.license_id);

        if now > payload.expires_at {
            return Err(ValidationError::Expired(payload.expires_at));
        }

        self.check_binding(&payload)?;

        if payload.enable_integrity {
            self.check_environment()?;
        }

        if let Some(max) = payload.run_cap() {
            let count = self
                .run_counter
                .increment(&payload.license_id)
                .map_err(|e| ValidationError::StorageUnavailable(e.to_string()))?;
            if count > max {
                return Err(ValidationError::RunLimitExceeded { count, max });
            }
        }

        if let Some(manifest) = payload.integrity_manifest() {
            integrity::verify(manifest, &self.install_dir)?;
            if let Some(tool) = self.sentinel.suspicious_process() {
                return Err(ValidationError::EnvironmentViolation(format!(
                    "analysis tool running: {tool}"
                )));
            }
        }

        Ok(payload)
    }

    fn check_binding(&self, payload: &LicensePayload) -> Result<(), ValidationError> {
        let fingerprint = self
            .local_fingerprint()
            .map_err(|e| ValidationError::StorageUnavailable(e.to_string()))?;
        let expected = payload.hwid_hash.trim().to_lowercase();
        if fixed_time_eq_str(&hwid_hash(fingerprint.as_str()), &expected) {
            Ok(())
        } else {
            Err(ValidationError::HwidMismatch)
        }
    }

    fn check_environment(&self) -> Result<(), ValidationError> {
        if self.sentinel.is_debugged() {
            return Err(ValidationError::EnvironmentViolation(
                "debugger attached".to_string(),
            ));
        }
        if self.sentinel.is_virtualized() {
            return Err(ValidationError::EnvironmentViolation(
                "running in a virtual machine".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Validator`].
pub struct ValidatorBuilder {
    public_key: LicensePublicKey,
    fingerprints: Option<FingerprintProvider>,
    fingerprint_length: usize,
    sentinel: Option<EnvironmentSentinel>,
    run_counter: Option<RunCounter>,
    install_dir: Option<PathBuf>,
}

impl ValidatorBuilder {
    /// Sets the fingerprint provider (required).
    #[must_use]
    pub fn fingerprints(mut self, provider: FingerprintProvider) -> Self {
        self.fingerprints = Some(provider);
        self
    }

    /// Sets the fingerprint length. Must match what the issuer was sent.
    #[must_use]
    pub fn fingerprint_length(mut self, length: usize) -> Self {
        self.fingerprint_length = length;
        self
    }

    /// Sets the environment sentinel (defaults to host probes).
    #[must_use]
    pub fn sentinel(mut self, sentinel: EnvironmentSentinel) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Sets the run counter (required).
    #[must_use]
    pub fn run_counter(mut self, counter: RunCounter) -> Self {
        self.run_counter = Some(counter);
        self
    }

    /// Sets the install directory for integrity checks (required).
    #[must_use]
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    /// Finishes the validator.
    pub fn build(self) -> LicenseResult<Validator> {
        check_fingerprint_length(self.fingerprint_length)?;
        let missing = |what: &str| LicenseError::InvalidArgument(format!("validator needs {what}"));
        Ok(Validator {
            public_key: self.public_key,
            fingerprints: self.fingerprints.ok_or_else(|| missing("a fingerprint provider"))?,
            fingerprint_length: self.fingerprint_length,
            sentinel: self.sentinel.unwrap_or_else(EnvironmentSentinel::host),
            run_counter: self.run_counter.ok_or_else(|| missing("a run counter"))?,
            install_dir: self.install_dir.ok_or_else(|| missing("an install directory"))?,
        })
    }
}

impl std::fmt::Debug for ValidatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorBuilder")
            .field("fingerprint_length", &self.fingerprint_length)
            .field("install_dir", &self.install_dir)
            .finish()
    }
}
