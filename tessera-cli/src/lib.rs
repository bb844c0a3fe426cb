//! Helpers shared by the `tessera` binary: key files, argument parsing and
//! exit codes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tessera_license::{
    ClientConfig, Fingerprint, IssuerKeyPair, LicenseError, LicensePayload, LicensePublicKey,
    LicenseStore, StoreLayout, ValidationError, Validator,
};
use tracing::info;

/// Private key file written by `keygen` (base64 PKCS#8 DER).
pub const PRIVATE_KEY_FILE: &str = "private_pkcs8.b64";

/// Public key file written by `keygen` (base64 SPKI DER).
pub const PUBLIC_KEY_FILE: &str = "public_spki.b64";

/// Exit code for a usage or I/O error outside validation.
pub const EXIT_FAILURE: u8 = 1;

/// Maps a validation failure to a distinct process exit code.
#[must_use]
pub fn exit_code(error: &ValidationError) -> u8 {
    match error {
        ValidationError::MalformedEnvelope(_) => 10,
        ValidationError::MalformedEncoding(_) => 11,
        ValidationError::InvalidSignature => 12,
        ValidationError::MalformedPayload(_) => 13,
        ValidationError::Expired(_) => 14,
        ValidationError::HwidMismatch => 15,
        ValidationError::EnvironmentViolation(_) => 16,
        ValidationError::RunLimitExceeded { .. } => 17,
        ValidationError::IntegrityViolation { .. } => 18,
        ValidationError::StorageUnavailable(_) => 19,
    }
}

/// Loads the issuer key pair from `dir`, generating it on first use.
///
/// Returns the key pair and whether it was newly created.
pub fn load_or_generate_keypair(dir: &Path) -> Result<(IssuerKeyPair, bool)> {
    let private_path = dir.join(PRIVATE_KEY_FILE);
    if private_path.exists() {
        info!("Loading issuer key from {:?}", private_path);
        let encoded = fs::read_to_string(&private_path).context("Failed to read private key file")?;
        let keypair =
            IssuerKeyPair::from_pkcs8_base64(&encoded).context("Failed to decode private key")?;
        return Ok((keypair, false));
    }

    info!("Generating new issuer key in {:?}", dir);
    fs::create_dir_all(dir).context("Failed to create key directory")?;
    let keypair = IssuerKeyPair::generate();
    fs::write(&private_path, keypair.to_pkcs8_base64()?).context("Failed to write private key file")?;
    fs::write(dir.join(PUBLIC_KEY_FILE), keypair.public_key_spki_base64()?)
        .context("Failed to write public key file")?;
    Ok((keypair, true))
}

/// Reads a base64 SPKI public key file.
pub fn load_public_key(path: &Path) -> Result<LicensePublicKey> {
    let encoded = fs::read_to_string(path)
        .with_context(|| format!("Failed to read public key {}", path.display()))?;
    LicensePublicKey::from_spki_base64(&encoded).context("Failed to decode public key")
}

/// Parses an expiry given as RFC 3339 or a plain `YYYY-MM-DD` date.
///
/// A plain date means the last second of that day in UTC.
pub fn parse_expiry(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("Invalid expiry {text:?} (expected RFC 3339 or YYYY-MM-DD)"))?;
    match date.and_hms_opt(23, 59, 59) {
        Some(end_of_day) => Ok(end_of_day.and_utc()),
        None => bail!("Invalid expiry {text:?}"),
    }
}

/// Returns the instant `days` days after `now`.
pub fn expiry_after_days(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    match Duration::try_days(days).and_then(|d| now.checked_add_signed(d)) {
        Some(at) => Ok(at),
        None => bail!("Expiry of {days} days is out of range"),
    }
}

/// Reads a JSON file-hash manifest as produced by `hash-dir`.
pub fn read_manifest(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&text).context("Manifest must be a JSON object of path to hash")
}

/// Loads the client config, or defaults if no path is given.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => Ok(ClientConfig::load(path)?),
        None => Ok(ClientConfig::default()),
    }
}

/// Opens the installed-license store described by `config`.
pub fn license_store(config: &ClientConfig, layout: &StoreLayout, fingerprint: &Fingerprint) -> LicenseStore {
    if config.encrypt_license {
        LicenseStore::sealed(&layout.license_path, fingerprint)
    } else {
        LicenseStore::plain(&layout.license_path)
    }
}

/// Validates the license installed for this machine.
///
/// Failing to resolve the state directory or the local fingerprint counts as
/// [`ValidationError::StorageUnavailable`].
pub fn validate_installed(
    validator: &Validator,
    config: &ClientConfig,
) -> Result<LicensePayload, ValidationError> {
    let storage = |e: LicenseError| ValidationError::StorageUnavailable(e.to_string());
    let layout = config.layout().map_err(storage)?;
    let code = validator.local_fingerprint().map_err(storage)?;
    validator.validate_stored(&license_store(config, &layout, &code))
}
