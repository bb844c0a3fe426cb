//! Property tests for signing, fingerprints and the payload codec.

mod common;

use std::sync::Arc;

use common::{machine_sources, t0, test_keypair};
use proptest::prelude::*;
use tessera_license::{
    sign, FingerprintProvider, FixedSecret, InstallSecret, LicenseBuilder, LicensePayload,
    FINGERPRINT_MAX_LEN, FINGERPRINT_MIN_LEN,
};

fn payload_strategy() -> impl Strategy<Value = LicensePayload> {
    (
        "[A-Za-z0-9_-]{8,43}",
        prop::collection::btree_set("[a-z]{1,12}", 0..4),
        prop::option::of(prop::collection::btree_map("[a-z]{1,8}(/[a-z]{1,8}){0,2}", "[0-9a-f]{64}", 0..4)),
        any::<bool>(),
        -1i64..1000,
        0i64..3650,
    )
        .prop_map(|(fp, features, hashes, integrity, max_runs, days)| {
            let mut builder = LicenseBuilder::new(fp, t0() + chrono::Duration::days(days))
                .issued_at(t0())
                .features(features)
                .enable_integrity(integrity)
                .max_run_count(max_runs);
            if let Some(hashes) = hashes {
                builder = builder.file_hashes(hashes);
            }
            builder.build().unwrap()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn payload_codec_roundtrip(payload in payload_strategy()) {
        let bytes = payload.to_json_bytes().unwrap();
        prop_assert_eq!(LicensePayload::from_json_bytes(&bytes).unwrap(), payload);
    }

    #[test]
    fn any_payload_bit_flip_breaks_signature(payload in payload_strategy(), bit in any::<prop::sample::Index>()) {
        let key = test_keypair();
        let (mut bytes, sig) = sign(&payload, &key).unwrap().decode().unwrap();
        let i = bit.index(bytes.len() * 8);
        bytes[i / 8] ^= 1 << (i % 8);
        prop_assert!(!key.public_key().verify(&bytes, &sig));
    }

    #[test]
    fn any_signature_bit_flip_breaks_signature(bit in 0usize..512) {
        let key = test_keypair();
        let message = b"license payload";
        let mut sig = key.sign_bytes(message);
        sig[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(!key.public_key().verify(message, &sig));
    }

    #[test]
    fn fingerprint_length_and_determinism(
        len in FINGERPRINT_MIN_LEN..=FINGERPRINT_MAX_LEN,
        guid in "[ -~]{0,40}",
        cpu in "[ -~]{0,40}",
        secret in prop::collection::vec(any::<u8>(), 32),
    ) {
        let make = || FingerprintProvider::new(
            machine_sources(&guid, &cpu, "board"),
            Arc::new(FixedSecret::new(InstallSecret::from_bytes(secret.clone()))),
        );
        let fp = make().get(len).unwrap();
        prop_assert_eq!(fp.as_str().len(), len);
        prop_assert_eq!(make().get(len).unwrap(), fp);
    }
}
