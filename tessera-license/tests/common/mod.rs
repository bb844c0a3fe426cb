//! Shared test helpers for license tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tessera_license::{
    EnvironmentProbe, EnvironmentSentinel, FingerprintProvider, FixedSecret,
    HardwareAttributeSource, InstallSecret, IssuerKeyPair, LicenseBuilder, ProcessEnumerator,
    RunCounter, StaticAttribute, Validator,
};

pub const TEST_FP_LEN: usize = 32;

/// Returns a deterministic P-256 issuer key from a fixed scalar.
pub fn test_keypair() -> IssuerKeyPair {
    let scalar: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    IssuerKeyPair::from_secret_bytes(&scalar).unwrap()
}

/// A fixed instant used as "now" in validation tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Hardware attributes of a simulated machine.
pub fn machine_sources(guid: &str, cpu: &str, board: &str) -> Vec<Box<dyn HardwareAttributeSource>> {
    vec![
        Box::new(StaticAttribute::new("machine-guid", "no-guid", Some(guid.to_string()))),
        Box::new(StaticAttribute::new("cpu-id", "no-cpu", Some(cpu.to_string()))),
        Box::new(StaticAttribute::new("board-serial", "no-board", Some(board.to_string()))),
    ]
}

/// Fingerprint provider for machine "A" or "B" with a fixed install secret.
pub fn machine(name: &str) -> FingerprintProvider {
    let secret_byte = name.bytes().next().unwrap_or(0);
    FingerprintProvider::new(
        machine_sources(
            &format!("guid-{name}"),
            &format!("cpu-{name}"),
            &format!("board-{name}"),
        ),
        Arc::new(FixedSecret::new(InstallSecret::from_bytes(vec![secret_byte; 32]))),
    )
}

/// Probe with scripted virtualization/debugger signals.
#[derive(Debug, Default, Clone)]
pub struct FakeProbe {
    pub markers: Vec<String>,
    pub debugger: bool,
}

impl EnvironmentProbe for FakeProbe {
    fn hypervisor_markers(&self) -> Vec<String> {
        self.markers.clone()
    }

    fn debugger_attached(&self) -> bool {
        self.debugger
    }
}

/// Process list that records how often it was consulted.
#[derive(Debug, Default, Clone)]
pub struct FakeProcesses {
    pub names: Vec<String>,
    pub calls: Arc<Mutex<usize>>,
}

impl FakeProcesses {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            calls: Arc::default(),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ProcessEnumerator for FakeProcesses {
    fn list_running_process_names(&self) -> Vec<String> {
        *self.calls.lock().unwrap() += 1;
        self.names.clone()
    }
}

/// A sentinel over a clean, bare-metal environment.
pub fn clean_sentinel() -> EnvironmentSentinel {
    EnvironmentSentinel::new(Box::new(FakeProbe::default()), Box::new(FakeProcesses::default()))
}

/// Temporary install directory plus run-count file.
pub struct Harness {
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_counts_path(&self) -> std::path::PathBuf {
        self.dir.path().join("state").join("run_counts.json")
    }

    /// Validator on machine `name` with the given sentinel.
    pub fn validator_with(&self, name: &str, sentinel: EnvironmentSentinel) -> Validator {
        Validator::builder(test_keypair().public_key())
            .fingerprints(machine(name))
            .fingerprint_length(TEST_FP_LEN)
            .sentinel(sentinel)
            .run_counter(RunCounter::new(self.run_counts_path()))
            .install_dir(self.install_dir())
            .build()
            .unwrap()
    }

    /// Validator on machine `name` in a clean environment.
    pub fn validator(&self, name: &str) -> Validator {
        self.validator_with(name, clean_sentinel())
    }
}

/// Fingerprint string for machine `name`.
pub fn fingerprint_of(name: &str) -> String {
    machine(name).get(TEST_FP_LEN).unwrap().as_str().to_string()
}

/// Builder for a license bound to machine `name`, valid one year from `t0`.
pub fn license_for(name: &str) -> LicenseBuilder {
    LicenseBuilder::new(fingerprint_of(name), t0() + chrono::Duration::days(365))
        .issued_at(t0() - chrono::Duration::days(1))
}

/// Signs `builder` with the test key and returns the license file JSON.
pub fn issue_json(builder: LicenseBuilder) -> String {
    let (_, envelope) = builder.sign(&test_keypair()).unwrap();
    envelope.to_json().unwrap()
}
