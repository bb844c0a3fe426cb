mod common;

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::{machine, machine_sources};
use sha2::{Digest, Sha256};
use tessera_license::{
    hwid_hash, FingerprintProvider, FixedSecret, HardwareAttributeSource, InstallSecret,
    LicenseError, StaticAttribute, FINGERPRINT_MAX_LEN, FINGERPRINT_MIN_LEN,
};

fn provider_with(
    sources: Vec<Box<dyn HardwareAttributeSource>>,
    secret: [u8; 32],
) -> FingerprintProvider {
    FingerprintProvider::new(
        sources,
        Arc::new(FixedSecret::new(InstallSecret::from_bytes(secret.to_vec()))),
    )
}

fn expected_fingerprint(raw: &str, len: usize) -> String {
    let mut encoded = URL_SAFE_NO_PAD.encode(Sha256::digest(raw.trim().to_lowercase().as_bytes()));
    encoded.truncate(len);
    encoded
}

#[test]
fn fingerprint_hashes_versioned_material() {
    let provider = provider_with(machine_sources("GUID-1", "CPU-1", "Board-1"), [0xab; 32]);
    let raw = format!("v1|GUID-1|CPU-1|Board-1|{}", "AB".repeat(32));
    assert_eq!(
        provider.get(43).unwrap().as_str(),
        expected_fingerprint(&raw, 43)
    );
}

#[test]
fn unavailable_attributes_use_sentinels() {
    let sources: Vec<Box<dyn HardwareAttributeSource>> = vec![
        Box::new(StaticAttribute::new("machine-guid", "no-guid", None)),
        Box::new(StaticAttribute::new("cpu-id", "no-cpu", Some("   ".to_string()))),
        Box::new(StaticAttribute::new("board-serial", "no-board", Some(" B ".to_string()))),
    ];
    let provider = provider_with(sources, [0x01; 32]);
    let raw = format!("v1|no-guid|no-cpu|B|{}", "01".repeat(32));
    assert_eq!(provider.get(32).unwrap().as_str(), expected_fingerprint(&raw, 32));
}

#[test]
fn fingerprint_is_deterministic() {
    let a = machine("A");
    assert_eq!(a.get(32).unwrap(), a.get(32).unwrap());
    assert_eq!(machine("A").get(32).unwrap(), a.get(32).unwrap());
}

#[test]
fn fingerprint_truncates_to_requested_length() {
    let a = machine("A");
    let full = a.get(FINGERPRINT_MAX_LEN).unwrap();
    for len in [FINGERPRINT_MIN_LEN, 16, 32, FINGERPRINT_MAX_LEN] {
        let fp = a.get(len).unwrap();
        assert_eq!(fp.as_str().len(), len);
        assert!(full.as_str().starts_with(fp.as_str()));
    }
}

#[test]
fn fingerprint_is_url_safe() {
    let fp = machine("A").get(FINGERPRINT_MAX_LEN).unwrap();
    assert!(
        fp.as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    );
}

#[test]
fn out_of_range_length_rejected() {
    let a = machine("A");
    for len in [0, FINGERPRINT_MIN_LEN - 1, FINGERPRINT_MAX_LEN + 1, 64] {
        assert!(matches!(a.get(len), Err(LicenseError::InvalidArgument(_))));
    }
}

#[test]
fn install_secret_changes_fingerprint() {
    let sources = || machine_sources("g", "c", "b");
    let one = provider_with(sources(), [1; 32]).get(32).unwrap();
    let two = provider_with(sources(), [2; 32]).get(32).unwrap();
    assert_ne!(one, two);
}

#[test]
fn different_machines_differ() {
    assert_ne!(machine("A").get(32).unwrap(), machine("B").get(32).unwrap());
}

#[test]
fn hwid_hash_is_lowercase_hex_sha256() {
    let hash = hwid_hash("abc");
    assert_eq!(
        hash,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    let fp = machine("A").get(32).unwrap();
    assert_eq!(fp.hwid_hash(), hwid_hash(fp.as_str()));
}

#[test]
fn host_provider_produces_fingerprint() {
    let provider = FingerprintProvider::host(Arc::new(FixedSecret::new(
        InstallSecret::from_bytes(vec![9; 32]),
    )));
    let fp = provider.get(32).unwrap();
    assert_eq!(fp.as_str().len(), 32);
    assert_eq!(provider.get(32).unwrap(), fp);
}
