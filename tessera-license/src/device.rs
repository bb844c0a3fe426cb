//! Device fingerprinting for license binding.
//!
//! The fingerprint is a short, URL-safe string the user sends to the issuer.
//! It is the SHA-256 of a versioned line combining hardware attributes and
//! the per-install secret, so it never exposes the raw identifiers:
//!
//! ```text
//! v1|<machine guid>|<cpu id>|<board serial>|<hex(install secret)>
//! ```
//!
//! Unreadable attributes contribute a fixed sentinel (`no-guid`, `no-cpu`,
//! `no-board`) instead of failing, so a machine always has a fingerprint.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::envelope::BASE64_URL;
use crate::error::{LicenseError, LicenseResult};
use crate::secret::SecretSource;

/// Version tag prefixed to the fingerprint material.
pub const FINGERPRINT_VERSION_TAG: &str = "v1";

/// Shortest fingerprint accepted.
pub const FINGERPRINT_MIN_LEN: usize = 8;

/// Length of an unpadded base64url SHA-256 digest.
pub const FINGERPRINT_MAX_LEN: usize = 43;

/// Length used when nothing else is configured.
pub const DEFAULT_FINGERPRINT_LEN: usize = 32;

/// A hardware or OS attribute that contributes to the fingerprint.
pub trait HardwareAttributeSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Literal substituted when the attribute cannot be read.
    fn sentinel(&self) -> &str;

    /// Reads the attribute, or `None` if it is unavailable.
    fn read(&self) -> Option<String>;

    /// Reads the attribute, falling back to the sentinel.
    fn value_or_sentinel(&self) -> String {
        match self.read().map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => v,
            _ => {
                debug!("Hardware attribute {} unavailable", self.name());
                self.sentinel().to_string()
            }
        }
    }
}

/// A fixed attribute value, for injected or pre-collected identifiers.
#[derive(Debug, Clone)]
pub struct StaticAttribute {
    name: String,
    sentinel: String,
    value: Option<String>,
}

impl StaticAttribute {
    /// Creates an attribute that always reads `value`.
    pub fn new(name: impl Into<String>, sentinel: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            sentinel: sentinel.into(),
            value,
        }
    }
}

impl HardwareAttributeSource for StaticAttribute {
    fn name(&self) -> &str {
        &self.name
    }

    fn sentinel(&self) -> &str {
        &self.sentinel
    }

    fn read(&self) -> Option<String> {
        self.value.clone()
    }
}

/// Attributes read from the running host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAttribute {
    /// OS installation identifier (MachineGuid, machine-id, IOPlatformUUID).
    MachineGuid,
    /// Processor identifier.
    CpuId,
    /// Baseboard or platform serial number.
    BoardSerial,
}

impl HostAttribute {
    /// All host attributes in fingerprint order.
    pub const ALL: [HostAttribute; 3] = [Self::MachineGuid, Self::CpuId, Self::BoardSerial];
}

impl HardwareAttributeSource for HostAttribute {
    fn name(&self) -> &str {
        match self {
            Self::MachineGuid => "machine-guid",
            Self::CpuId => "cpu-id",
            Self::BoardSerial => "board-serial",
        }
    }

    fn sentinel(&self) -> &str {
        match self {
            Self::MachineGuid => "no-guid",
            Self::CpuId => "no-cpu",
            Self::BoardSerial => "no-board",
        }
    }

    fn read(&self) -> Option<String> {
        match self {
            Self::MachineGuid => get_machine_id(),
            Self::CpuId => get_cpu_id(),
            Self::BoardSerial => get_board_serial(),
        }
    }
}

/// Returns boxed sources for every [`HostAttribute`].
#[must_use]
pub fn host_sources() -> Vec<Box<dyn HardwareAttributeSource>> {
    HostAttribute::ALL
        .into_iter()
        .map(|a| Box::new(a) as Box<dyn HardwareAttributeSource>)
        .collect()
}

/// A derived machine fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the binding hash stored in licenses for this fingerprint.
    #[must_use]
    pub fn hwid_hash(&self) -> String {
        hwid_hash(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.0).finish()
    }
}

/// Lowercase hex SHA-256 of a fingerprint string.
#[must_use]
pub fn hwid_hash(fingerprint: &str) -> String {
    hex::encode(Sha256::digest(fingerprint.as_bytes()))
}

/// Checks that `length` is a supported fingerprint length.
pub fn check_fingerprint_length(length: usize) -> LicenseResult<()> {
    if (FINGERPRINT_MIN_LEN..=FINGERPRINT_MAX_LEN).contains(&length) {
        Ok(())
    } else {
        Err(LicenseError::InvalidArgument(format!(
            "fingerprint length must be between {FINGERPRINT_MIN_LEN} and {FINGERPRINT_MAX_LEN}, got {length}"
        )))
    }
}

/// Derives the machine fingerprint from hardware sources and the install secret.
pub struct FingerprintProvider {
    sources: Vec<Box<dyn HardwareAttributeSource>>,
    secret: Arc<dyn SecretSource>,
}

impl FingerprintProvider {
    /// Creates a provider over explicit sources.
    pub fn new(sources: Vec<Box<dyn HardwareAttributeSource>>, secret: Arc<dyn SecretSource>) -> Self {
        Self { sources, secret }
    }

    /// Creates a provider over the running host's attributes.
    pub fn host(secret: Arc<dyn SecretSource>) -> Self {
        Self::new(host_sources(), secret)
    }

    /// Computes the fingerprint truncated to `length` characters.
    ///
    /// Deterministic for unchanged hardware and install secret.
    pub fn get(&self, length: usize) -> LicenseResult<Fingerprint> {
        check_fingerprint_length(length)?;

        let secret = self.secret.get_or_create()?;
        let mut parts = Vec::with_capacity(self.sources.len() + 2);
        parts.push(FINGERPRINT_VERSION_TAG.to_string());
        parts.extend(self.sources.iter().map(|s| s.value_or_sentinel()));
        parts.push(secret.to_hex());

        let raw = parts.join("|").trim().to_lowercase();
        let digest = Sha256::digest(raw.as_bytes());
        let mut encoded = BASE64_URL.encode(digest);
        encoded.truncate(length);
        Ok(Fingerprint(encoded))
    }
}

impl fmt::Debug for FingerprintProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("FingerprintProvider")
            .field("sources", &names)
            .finish()
    }
}

// ── Host attribute readers ───────────────────────────────────────

/// Runs a command and returns its trimmed stdout when it succeeds.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn ioreg_platform_field(field: &str) -> Option<String> {
    command_output("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).and_then(|output| {
        output
            .lines()
            .find(|l| l.contains(field))
            .and_then(|l| l.split('"').nth(3))
            .map(String::from)
    })
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn powershell_value(expression: &str) -> Option<String> {
    command_output("powershell", &["-NoProfile", "-NonInteractive", "-Command", expression])
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        ioreg_platform_field("IOPlatformUUID")
    }

    #[cfg(target_os = "linux")]
    {
        read_trimmed("/etc/machine-id").or_else(|| read_trimmed("/var/lib/dbus/machine-id"))
    }

    #[cfg(target_os = "windows")]
    {
        command_output(
            "reg",
            &[
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
                "/reg:64",
            ],
        )
        .and_then(|output| {
            output
                .lines()
                .find(|l| l.contains("MachineGuid"))
                .and_then(|l| l.split_whitespace().last())
                .map(String::from)
        })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets a processor identifier.
fn get_cpu_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        command_output("sysctl", &["-n", "machdep.cpu.brand_string"])
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo").ok().and_then(|content| {
            content
                .lines()
                .find(|l| l.starts_with("model name") || l.starts_with("Serial"))
                .and_then(|l| l.split_once(':'))
                .map(|(_, v)| v.trim().to_string())
        })
    }

    #[cfg(target_os = "windows")]
    {
        powershell_value("(Get-CimInstance Win32_Processor | Select-Object -First 1).ProcessorId")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets the baseboard serial number.
fn get_board_serial() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        ioreg_platform_field("IOPlatformSerialNumber")
    }

    #[cfg(target_os = "linux")]
    {
        // board_serial is root-only on most distributions
        read_trimmed("/sys/class/dmi/id/board_serial")
            .or_else(|| read_trimmed("/sys/class/dmi/id/product_uuid"))
    }

    #[cfg(target_os = "windows")]
    {
        powershell_value("(Get-CimInstance Win32_BaseBoard | Select-Object -First 1).SerialNumber")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}
