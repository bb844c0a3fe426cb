//! Best-effort detection of hostile execution environments.
//!
//! Three signals: running under a hypervisor, a debugger attached to this
//! process, and a known reverse-engineering tool among running processes.
//! Every probe is heuristic. Sources that cannot be read count as "not
//! detected"; the sentinel itself never fails.
//!
//! Matching is platform independent and works on strings supplied by an
//! [`EnvironmentProbe`] and a [`ProcessEnumerator`], so it can be exercised
//! with fakes.

use tracing::debug;

/// Substrings of hardware vendor/model strings that indicate a hypervisor.
pub const HYPERVISOR_MARKERS: &[&str] = &[
    "vmware",
    "virtualbox",
    "vbox",
    "qemu",
    "kvm",
    "xen",
    "parallels",
    "bochs",
    "bhyve",
    "hyper-v",
    "virtual machine",
];

/// Tool names matched against the whole process name. These are short
/// enough that substring matching would hit unrelated processes.
pub const EXACT_TOOL_NAMES: &[&str] = &["ida", "idaw", "idaq", "idaq64", "gdb", "jeb", "jadx"];

/// Tool names matched anywhere within a process name.
pub const TOOL_NAME_FRAGMENTS: &[&str] = &[
    "ollydbg",
    "x32dbg",
    "x64dbg",
    "ghidra",
    "cheatengine",
    "windbg",
    "radare2",
    "dotpeek",
    "ilspy",
    "reflexil",
    "telerik",
    "de4dot",
    "confuserex",
    "protectionid",
];

/// Reads raw virtualization and debugger signals.
pub trait EnvironmentProbe: Send + Sync {
    /// Vendor, product and firmware strings describing the machine.
    fn hypervisor_markers(&self) -> Vec<String>;

    /// True if a debugger is attached to the current process.
    fn debugger_attached(&self) -> bool;
}

/// Lists running processes.
pub trait ProcessEnumerator: Send + Sync {
    /// Process names (executable names, not full command lines).
    fn list_running_process_names(&self) -> Vec<String>;
}

/// Returns the first marker found in any of `strings`.
#[must_use]
pub fn find_hypervisor_marker(strings: &[String]) -> Option<&'static str> {
    strings.iter().find_map(|s| {
        let s = s.to_lowercase();
        HYPERVISOR_MARKERS.iter().copied().find(|m| s.contains(m))
    })
}

/// Normalizes a process name: basename, lowercase, no `.exe` suffix.
fn normalize_process_name(name: &str) -> String {
    let base = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    base.strip_suffix(".exe").map(str::to_string).unwrap_or(base)
}

/// Returns true if `name` looks like a known analysis tool.
#[must_use]
pub fn is_analysis_tool(name: &str) -> bool {
    let name = normalize_process_name(name);
    if name.is_empty() {
        return false;
    }
    EXACT_TOOL_NAMES.contains(&name.as_str()) || TOOL_NAME_FRAGMENTS.iter().any(|t| name.contains(t))
}

/// Environment checks used by the validator.
pub struct EnvironmentSentinel {
    probe: Box<dyn EnvironmentProbe>,
    processes: Box<dyn ProcessEnumerator>,
    enabled: bool,
}

impl EnvironmentSentinel {
    /// Creates a sentinel over explicit probes.
    pub fn new(probe: Box<dyn EnvironmentProbe>, processes: Box<dyn ProcessEnumerator>) -> Self {
        Self {
            probe,
            processes,
            enabled: true,
        }
    }

    /// Creates a sentinel over the running host.
    pub fn host() -> Self {
        Self::new(Box::new(HostProbe), Box::new(HostProcesses))
    }

    /// A sentinel that never detects anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::host()
        }
    }

    /// True if the machine appears to be a virtual machine.
    pub fn is_virtualized(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match find_hypervisor_marker(&self.probe.hypervisor_markers()) {
            Some(marker) => {
                debug!("Hypervisor marker detected: {}", marker);
                true
            }
            None => false,
        }
    }

    /// True if a debugger is attached to this process.
    pub fn is_debugged(&self) -> bool {
        self.enabled && self.probe.debugger_attached()
    }

    /// Name of the first running analysis tool, if any.
    pub fn suspicious_process(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.processes
            .list_running_process_names()
            .into_iter()
            .find(|name| is_analysis_tool(name))
    }
}

impl std::fmt::Debug for EnvironmentSentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentSentinel")
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ── Host implementations ─────────────────────────────────────────

/// Reads virtualization and debugger signals from the running OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl EnvironmentProbe for HostProbe {
    fn hypervisor_markers(&self) -> Vec<String> {
        host_hypervisor_markers()
    }

    fn debugger_attached(&self) -> bool {
        host_debugger_attached()
    }
}

/// Enumerates processes on the running OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcesses;

impl ProcessEnumerator for HostProcesses {
    fn list_running_process_names(&self) -> Vec<String> {
        host_process_names()
    }
}

#[cfg_attr(target_os = "linux", allow(dead_code))]
fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
}

#[cfg(target_os = "linux")]
fn host_hypervisor_markers() -> Vec<String> {
    [
        "/sys/class/dmi/id/sys_vendor",
        "/sys/class/dmi/id/product_name",
        "/sys/class/dmi/id/board_vendor",
        "/sys/class/dmi/id/bios_vendor",
        "/sys/hypervisor/type",
    ]
    .iter()
    .filter_map(|path| std::fs::read_to_string(path).ok())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect()
}

#[cfg(target_os = "macos")]
fn host_hypervisor_markers() -> Vec<String> {
    let mut markers = Vec::new();
    if command_stdout("sysctl", &["-n", "kern.hv_vmm_present"]).is_some_and(|v| v.trim() == "1") {
        markers.push("virtual machine".to_string());
    }
    if let Some(model) = command_stdout("sysctl", &["-n", "hw.model"]) {
        markers.push(model.trim().to_string());
    }
    markers
}

#[cfg(target_os = "windows")]
fn host_hypervisor_markers() -> Vec<String> {
    command_stdout(
        "powershell",
        &[
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "$c = Get-CimInstance Win32_ComputerSystem; $c.Manufacturer; $c.Model",
        ],
    )
    .map(|out| out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    .unwrap_or_default()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn host_hypervisor_markers() -> Vec<String> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn host_debugger_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|l| l.starts_with("TracerPid:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|pid| pid.parse::<u32>().ok())
        })
        .is_some_and(|pid| pid != 0)
}

#[cfg(target_os = "windows")]
fn host_debugger_attached() -> bool {
    unsafe extern "system" {
        fn IsDebuggerPresent() -> i32;
    }
    // SAFETY: IsDebuggerPresent takes no arguments and only reads the PEB.
    unsafe { IsDebuggerPresent() != 0 }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn host_debugger_attached() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn host_process_names() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| std::fs::read_to_string(e.path().join("comm")).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(target_os = "macos")]
fn host_process_names() -> Vec<String> {
    command_stdout("ps", &["-axco", "command"])
        .map(|out| {
            out.lines()
                .skip(1)
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(target_os = "windows")]
fn host_process_names() -> Vec<String> {
    command_stdout("tasklist", &["/fo", "csv", "/nh"])
        .map(|out| {
            out.lines()
                .filter_map(|l| l.split("\",\"").next())
                .map(|name| name.trim_matches('"').to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn host_process_names() -> Vec<String> {
    Vec::new()
}
