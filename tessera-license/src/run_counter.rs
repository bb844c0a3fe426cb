//! Persistent per-license run counts.
//!
//! Counts live in a small JSON object keyed by license id. The store owns
//! its lock, so increments from threads sharing one `RunCounter` are
//! serialized. Separate processes are not coordinated.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{LicenseError, LicenseResult};

type Counts = BTreeMap<String, u64>;

/// File-backed run counter.
#[derive(Debug)]
pub struct RunCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunCounter {
    /// Creates a counter stored at `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the counts file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds one run for `license_id` and returns the new count.
    pub fn increment(&self, license_id: &str) -> LicenseResult<u64> {
        let _guard = self.guard();
        let mut counts = self.load();
        let count = counts.entry(license_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        self.save(&counts)?;
        debug!("Run count for {} is now {}", license_id, count);
        Ok(count)
    }

    /// Returns the current count for `license_id` (0 if never run).
    #[must_use]
    pub fn get(&self, license_id: &str) -> u64 {
        let _guard = self.guard();
        self.load().get(license_id).copied().unwrap_or(0)
    }

    /// Clears the count for `license_id`. Returns true if one existed.
    pub fn reset(&self, license_id: &str) -> LicenseResult<bool> {
        let _guard = self.guard();
        let mut counts = self.load();
        if counts.remove(license_id).is_none() {
            return Ok(false);
        }
        self.save(&counts)?;
        debug!("Run count for {} cleared", license_id);
        Ok(true)
    }

    fn load(&self) -> Counts {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Counts::new(),
            Err(e) => {
                warn!("Run counts at {} unreadable, starting from zero: {}", self.path.display(), e);
                return Counts::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("Run counts at {} corrupt, starting from zero: {}", self.path.display(), e);
            Counts::new()
        })
    }

    fn save(&self, counts: &Counts) -> LicenseResult<()> {
        let storage = |e: std::io::Error| {
            LicenseError::Storage(format!("failed to write {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        let json = serde_json::to_vec_pretty(counts)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(storage)?;
        fs::rename(&tmp, &self.path).map_err(storage)
    }
}
