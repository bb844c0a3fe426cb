//! Offline licensing for Tessera.
//!
//! This crate handles:
//! - Issuing licenses signed with ECDSA P-256 (issuer side)
//! - Machine fingerprinting for device binding
//! - Multi-stage validation of an installed license
//! - Per-install secret, run counts and license file at rest
//!
//! # Design Principles
//!
//! - **Zero phoning home**: validation never touches the network
//! - **Device binding**: a license carries the hash of one machine's fingerprint
//! - **Fixed stage order**: the first failing check decides the outcome
//! - **Injected probes**: hardware, process and debugger sources are traits
//!
//! # License File Format
//!
//! `{"payload": base64url(json), "sig": base64url(r || s), "formatVersion": 2}`
//! The payload is a JSON object containing:
//! - license id, issue and expiry times, machine hash
//! - features, optional file manifest, integrity toggle, run cap

mod config;
mod device;
mod envelope;
mod error;
mod integrity;
mod key;
mod payload;
mod run_counter;
mod secret;
mod sentinel;
mod signer;
mod store;
mod validator;

pub use config::{ClientConfig, StoreLayout};
pub use device::{
    check_fingerprint_length, host_sources, hwid_hash, Fingerprint, FingerprintProvider,
    HardwareAttributeSource, HostAttribute, StaticAttribute, DEFAULT_FINGERPRINT_LEN,
    FINGERPRINT_MAX_LEN, FINGERPRINT_MIN_LEN, FINGERPRINT_VERSION_TAG,
};
pub use envelope::{LicenseEnvelope, FORMAT_VERSION, LEGACY_FORMAT_VERSION};
pub use error::{LicenseError, LicenseResult, ValidationError};
pub use integrity::{
    hash_directory, sha256_file_hex, verify as verify_integrity, IntegrityFailure,
    IntegrityReason, DEFAULT_MANIFEST_EXTENSIONS,
};
pub use key::{IssuerKeyPair, LicensePublicKey};
pub use payload::{LicensePayload, UNLIMITED_RUNS};
pub use run_counter::RunCounter;
pub use secret::{FixedSecret, InstallSecret, SecretSource, SecretStore, INSTALL_SECRET_LEN};
pub use sentinel::{
    find_hypervisor_marker, is_analysis_tool, EnvironmentProbe, EnvironmentSentinel,
    HostProbe, HostProcesses, ProcessEnumerator, EXACT_TOOL_NAMES, HYPERVISOR_MARKERS,
    TOOL_NAME_FRAGMENTS,
};
pub use signer::{sign, LicenseBuilder};
pub use store::LicenseStore;
pub use validator::{Validator, ValidatorBuilder};
