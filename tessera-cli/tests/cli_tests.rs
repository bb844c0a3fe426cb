use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tessera_cli::{
    exit_code, expiry_after_days, license_store, load_config, load_or_generate_keypair,
    load_public_key, parse_expiry, read_manifest, validate_installed, EXIT_FAILURE,
    PRIVATE_KEY_FILE, PUBLIC_KEY_FILE,
};
use tessera_license::{
    ClientConfig, EnvironmentSentinel, FingerprintProvider, FixedSecret, InstallSecret,
    IntegrityReason, IssuerKeyPair, LicenseBuilder, LicenseError, LicenseResult, RunCounter,
    SecretSource, ValidationError, Validator,
};

struct BrokenSecret;

impl SecretSource for BrokenSecret {
    fn get_or_create(&self) -> LicenseResult<InstallSecret> {
        Err(LicenseError::Storage("secret store offline".to_string()))
    }
}

fn installed_validator(
    keypair: &IssuerKeyPair,
    config: &ClientConfig,
    secret: Arc<dyn SecretSource>,
) -> Validator {
    let layout = config.layout().unwrap();
    Validator::builder(keypair.public_key())
        .fingerprints(FingerprintProvider::new(Vec::new(), secret))
        .sentinel(EnvironmentSentinel::disabled())
        .run_counter(RunCounter::new(layout.run_count_path))
        .install_dir(layout.dir)
        .build()
        .unwrap()
}

#[test]
fn keygen_creates_then_reuses_keys() {
    let dir = tempfile::tempdir().unwrap();
    let keys = dir.path().join("keys");

    let (first, created) = load_or_generate_keypair(&keys).unwrap();
    assert!(created);
    assert!(keys.join(PRIVATE_KEY_FILE).exists());
    assert!(keys.join(PUBLIC_KEY_FILE).exists());

    let (second, created) = load_or_generate_keypair(&keys).unwrap();
    assert!(!created);
    assert_eq!(second.public_key(), first.public_key());

    let public = load_public_key(&keys.join(PUBLIC_KEY_FILE)).unwrap();
    assert_eq!(public, first.public_key());
}

#[test]
fn corrupt_private_key_is_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(PRIVATE_KEY_FILE), "bm90IGEga2V5").unwrap();
    assert!(load_or_generate_keypair(dir.path()).is_err());
}

#[test]
fn missing_public_key_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_public_key(&dir.path().join(PUBLIC_KEY_FILE)).is_err());
}

#[test]
fn expiry_formats() {
    assert_eq!(
        parse_expiry("2027-12-31").unwrap(),
        Utc.with_ymd_and_hms(2027, 12, 31, 23, 59, 59).unwrap()
    );
    assert_eq!(
        parse_expiry("2027-06-01T08:00:00+02:00").unwrap(),
        Utc.with_ymd_and_hms(2027, 6, 1, 6, 0, 0).unwrap()
    );
    assert!(parse_expiry("next year").is_err());
    assert!(parse_expiry("2027-02-30").is_err());
}

#[test]
fn exit_codes_are_distinct_and_nonzero() {
    let errors = [
        ValidationError::MalformedEnvelope(String::new()),
        ValidationError::MalformedEncoding(String::new()),
        ValidationError::InvalidSignature,
        ValidationError::MalformedPayload(String::new()),
        ValidationError::Expired(Utc::now()),
        ValidationError::HwidMismatch,
        ValidationError::EnvironmentViolation(String::new()),
        ValidationError::RunLimitExceeded { count: 2, max: 1 },
        ValidationError::IntegrityViolation {
            path: String::new(),
            reason: IntegrityReason::Missing,
        },
        ValidationError::StorageUnavailable(String::new()),
    ];
    let codes: BTreeSet<u8> = errors.iter().map(exit_code).collect();
    assert_eq!(codes.len(), errors.len());
    assert!(!codes.contains(&0));
    assert!(!codes.contains(&EXIT_FAILURE));
}

#[test]
fn manifest_file_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    fs::write(&path, r#"{"app.exe": "00ff", "lib/core.dll": "aa"}"#).unwrap();
    let manifest = read_manifest(&path).unwrap();
    assert_eq!(manifest.get("lib/core.dll").map(String::as_str), Some("aa"));

    fs::write(&path, "[1, 2]").unwrap();
    assert!(read_manifest(&path).is_err());
}

#[test]
fn config_defaults_without_file() {
    assert_eq!(load_config(None).unwrap(), ClientConfig::default());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tessera.toml");
    fs::write(&path, "encrypt_license = false\n").unwrap();
    assert!(!load_config(Some(path.as_path())).unwrap().encrypt_license);
}

#[test]
fn license_store_follows_encryption_setting() {
    let dir = tempfile::tempdir().unwrap();
    let fingerprint = FingerprintProvider::new(
        Vec::new(),
        Arc::new(FixedSecret::new(InstallSecret::from_bytes(vec![3; 32]))),
    )
    .get(32)
    .unwrap();

    let mut config = ClientConfig {
        data_dir: Some(PathBuf::from(dir.path())),
        ..ClientConfig::default()
    };
    let layout = config.layout().unwrap();
    let sealed = license_store(&config, &layout, &fingerprint);
    assert!(sealed.is_sealed());
    assert_eq!(sealed.path(), layout.license_path);

    config.encrypt_license = false;
    assert!(!license_store(&config, &layout, &fingerprint).is_sealed());
}

#[test]
fn expiry_in_days_is_checked() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    assert_eq!(
        expiry_after_days(now, 30).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap()
    );
    assert!(expiry_after_days(now, 300_000_000).is_err());
    assert!(expiry_after_days(now, 9_999_999_999_999).is_err());
    assert!(expiry_after_days(now, i64::MIN).is_err());
}

#[test]
fn installed_license_validates() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };
    let keypair = IssuerKeyPair::generate();
    let validator = installed_validator(
        &keypair,
        &config,
        Arc::new(FixedSecret::new(InstallSecret::from_bytes(vec![5; 32]))),
    );
    let code = validator.local_fingerprint().unwrap();

    let expires = Utc::now() + chrono::Duration::days(30);
    let (issued, envelope) = LicenseBuilder::new(code.as_str(), expires)
        .enable_integrity(false)
        .sign(&keypair)
        .unwrap();
    let layout = config.layout().unwrap();
    license_store(&config, &layout, &code)
        .save(&envelope.to_json().unwrap())
        .unwrap();

    let payload = validate_installed(&validator, &config).unwrap();
    assert_eq!(payload.license_id, issued.license_id);
}

#[test]
fn unreadable_fingerprint_is_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..ClientConfig::default()
    };
    let validator = installed_validator(&IssuerKeyPair::generate(), &config, Arc::new(BrokenSecret));

    let err = validate_installed(&validator, &config).unwrap_err();
    assert!(matches!(err, ValidationError::StorageUnavailable(_)), "{err:?}");
    assert_eq!(exit_code(&err), 19);
}
