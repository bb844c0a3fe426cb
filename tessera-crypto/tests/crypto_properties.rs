//! Property-based tests for the crypto module.
//!
//! These tests verify security properties that must always hold:
//! - Sealing is reversible with the correct key
//! - Tampering is detected
//! - Constant-time comparison agrees with ordinary equality

use proptest::prelude::*;
use tessera_crypto::{
    decrypt, encrypt, fill_random, fixed_time_eq, open, seal, DerivedKey, KdfParams,
    ScopeIdentity, ScopeProtector, UserScope, KEY_SIZE, NONCE_SIZE,
};

fn random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    fill_random(&mut bytes).unwrap();
    DerivedKey::from_bytes(bytes)
}

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn fast_scope(user: String) -> UserScope {
    UserScope::with_identity(
        ScopeIdentity {
            home: format!("/home/{user}"),
            user,
            host: "host".to_string(),
        },
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        },
    )
}

// =============================================================================
// ENCRYPTION PROPERTIES
// =============================================================================

mod encryption_properties {
    use super::*;

    proptest! {
        /// Sealing followed by opening with the same key returns the plaintext
        #[test]
        fn seal_roundtrip_preserves_data(plaintext in plaintext_strategy()) {
            let key = random_key();
            let sealed = seal(&key, &plaintext).unwrap();
            prop_assert_eq!(open(&key, &sealed).unwrap(), plaintext);
        }

        /// Tampered ciphertext fails authentication
        #[test]
        fn tampered_ciphertext_fails(
            plaintext in plaintext_strategy(),
            tamper_pos in any::<usize>(),
            tamper_bit in 0u8..8,
        ) {
            let key = random_key();
            let mut encrypted = encrypt(&key, &plaintext).unwrap();
            let pos = tamper_pos % encrypted.ciphertext.len();
            encrypted.ciphertext[pos] ^= 1 << tamper_bit;
            prop_assert!(decrypt(&key, &encrypted).is_err());
        }

        /// Tampered nonce fails authentication
        #[test]
        fn tampered_nonce_fails(
            plaintext in plaintext_strategy(),
            tamper_pos in 0usize..NONCE_SIZE,
            tamper_bit in 0u8..8,
        ) {
            let key = random_key();
            let mut encrypted = encrypt(&key, &plaintext).unwrap();
            encrypted.nonce[tamper_pos] ^= 1 << tamper_bit;
            prop_assert!(decrypt(&key, &encrypted).is_err());
        }
    }
}

// =============================================================================
// COMPARISON PROPERTIES
// =============================================================================

mod comparison_properties {
    use super::*;

    proptest! {
        /// fixed_time_eq agrees with == for arbitrary inputs
        #[test]
        fn agrees_with_equality(
            a in prop::collection::vec(any::<u8>(), 0..64),
            b in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assert_eq!(fixed_time_eq(&a, &b), a == b);
        }

        /// A single differing byte anywhere is always a mismatch
        #[test]
        fn any_single_difference_is_detected(
            a in prop::collection::vec(any::<u8>(), 1..64),
            pos in any::<usize>(),
        ) {
            let mut b = a.clone();
            let pos = pos % b.len();
            b[pos] = b[pos].wrapping_add(1);
            prop_assert!(!fixed_time_eq(&a, &b));
        }
    }
}

// =============================================================================
// SCOPE PROPERTIES
// =============================================================================

mod scope_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Any secret protected under a scope is recovered by that scope
        #[test]
        fn scope_roundtrip(
            user in "[a-z]{1,16}",
            secret in prop::collection::vec(any::<u8>(), 32..=64),
        ) {
            let scope = fast_scope(user);
            let blob = scope.protect(&secret).unwrap();
            prop_assert_eq!(scope.unprotect(&blob).unwrap(), secret);
        }
    }
}
