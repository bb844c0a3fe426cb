//! File integrity manifests.
//!
//! A manifest maps paths relative to the install directory (forward
//! slashes) to the expected lowercase hex SHA-256 of each file. The issuer
//! builds one with [`hash_directory`]; the client checks it with [`verify`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tessera_crypto::fixed_time_eq_str;
use tracing::{debug, warn};

use crate::error::{LicenseError, LicenseResult};

/// File extensions hashed by default when building a manifest.
pub const DEFAULT_MANIFEST_EXTENSIONS: &[&str] = &["exe", "dll", "so", "dylib"];

const READ_CHUNK: usize = 64 * 1024;

/// Why a manifest entry failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityReason {
    /// The file does not exist.
    Missing,
    /// The file's hash differs from the manifest.
    Modified,
    /// The manifest path escapes the install directory.
    UnsafePath,
    /// The file exists but could not be read.
    Unreadable(String),
}

impl fmt::Display for IntegrityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("file missing"),
            Self::Modified => f.write_str("hash mismatch"),
            Self::UnsafePath => f.write_str("path escapes install directory"),
            Self::Unreadable(e) => write!(f, "unreadable ({e})"),
        }
    }
}

/// The first manifest entry that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    /// Manifest key as written in the license.
    pub path: String,
    /// What went wrong.
    pub reason: IntegrityReason,
}

/// Streams a file through SHA-256 and returns lowercase hex.
pub fn sha256_file_hex(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Resolves a manifest key under `base_dir`.
///
/// Both `/` and `\` separate components. Absolute paths, drive prefixes and
/// `..` components are refused.
fn resolve(base_dir: &Path, relative: &str) -> Option<PathBuf> {
    let normalized = relative.replace('\\', "/");
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains(':') {
        return None;
    }

    let mut resolved = base_dir.to_path_buf();
    for part in normalized.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." {
            return None;
        }
        let component = Path::new(part);
        if !matches!(component.components().next(), Some(Component::Normal(_))) {
            return None;
        }
        resolved.push(component);
    }
    Some(resolved)
}

/// Checks every manifest entry against files under `base_dir`.
///
/// Entries are visited in sorted key order and the first failure is
/// returned. An empty manifest passes.
pub fn verify(manifest: &BTreeMap<String, String>, base_dir: &Path) -> Result<(), IntegrityFailure> {
    for (relative, expected) in manifest {
        let fail = |reason| IntegrityFailure {
            path: relative.clone(),
            reason,
        };

        let path = resolve(base_dir, relative).ok_or_else(|| fail(IntegrityReason::UnsafePath))?;
        let actual = match sha256_file_hex(&path) {
            Ok(hash) => hash,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(fail(IntegrityReason::Missing)),
            Err(e) => return Err(fail(IntegrityReason::Unreadable(e.to_string()))),
        };

        let expected = expected.trim().to_lowercase();
        if !fixed_time_eq_str(&actual, &expected) {
            warn!("Integrity check failed for {}", relative);
            return Err(fail(IntegrityReason::Modified));
        }
    }
    debug!("Integrity manifest verified ({} file(s))", manifest.len());
    Ok(())
}

/// Hashes files under `dir` into a manifest.
///
/// Recurses into subdirectories. Only files whose extension matches one of
/// `extensions` (case-insensitive) are included; an empty list includes
/// every file. Keys use forward slashes.
pub fn hash_directory(dir: &Path, extensions: &[&str]) -> LicenseResult<BTreeMap<String, String>> {
    if !dir.is_dir() {
        return Err(LicenseError::InvalidArgument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut manifest = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() || !matches_extension(&path, extensions) {
                continue;
            }

            let relative = path
                .strip_prefix(dir)
                .map_err(|e| LicenseError::Storage(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            manifest.insert(key, sha256_file_hex(&path)?);
        }
    }
    Ok(manifest)
}

fn matches_extension(path: &Path, extensions: &[&str]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}
