//! Client configuration and on-disk layout.
//!
//! ```toml
//! app_name = "acme-editor"
//! fingerprint_length = 32
//! encrypt_license = true
//! # data_dir = "/var/lib/acme"
//! ```
//!
//! Every field is optional. Without `data_dir`, state lives under
//! `<local data dir>/<app_name>/secure_data`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::{check_fingerprint_length, DEFAULT_FINGERPRINT_LEN};
use crate::error::{LicenseError, LicenseResult};

const SECURE_DATA_DIR: &str = "secure_data";

/// Client-side licensing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Application name, used as the data subdirectory.
    pub app_name: String,
    /// Overrides the per-install directory.
    pub data_dir: Option<PathBuf>,
    /// Fingerprint length in characters (8 to 43).
    pub fingerprint_length: usize,
    /// Seal the installed license under a fingerprint-derived key.
    pub encrypt_license: bool,
    /// License file name.
    pub license_file: String,
    /// Install secret file name.
    pub secret_file: String,
    /// Run count file name.
    pub run_count_file: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: "tessera".to_string(),
            data_dir: None,
            fingerprint_length: DEFAULT_FINGERPRINT_LEN,
            encrypt_license: true,
            license_file: "license.dat".to_string(),
            secret_file: "install_secret.bin".to_string(),
            run_count_file: "run_counts.json".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parses and checks a TOML document.
    pub fn from_toml_str(text: &str) -> LicenseResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| LicenseError::Config(format!("invalid TOML: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> LicenseResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LicenseError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks field values.
    pub fn check(&self) -> LicenseResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(LicenseError::Config("app_name must not be empty".to_string()));
        }
        check_fingerprint_length(self.fingerprint_length)
            .map_err(|e| LicenseError::Config(e.to_string()))?;
        for (field, name) in [
            ("license_file", &self.license_file),
            ("secret_file", &self.secret_file),
            ("run_count_file", &self.run_count_file),
        ] {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err(LicenseError::Config(format!(
                    "{field} must be a plain file name, got {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Resolves absolute paths for the local state files.
    pub fn layout(&self) -> LicenseResult<StoreLayout> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .ok_or_else(|| LicenseError::Config("no local data directory on this platform".to_string()))?
                .join(&self.app_name)
                .join(SECURE_DATA_DIR),
        };
        Ok(StoreLayout::new(dir, self))
    }
}

/// Absolute paths of the per-install state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    /// Directory holding all state files.
    pub dir: PathBuf,
    /// Installed license.
    pub license_path: PathBuf,
    /// Wrapped install secret.
    pub secret_path: PathBuf,
    /// Run count map.
    pub run_count_path: PathBuf,
}

impl StoreLayout {
    fn new(dir: PathBuf, config: &ClientConfig) -> Self {
        Self {
            license_path: dir.join(&config.license_file),
            secret_path: dir.join(&config.secret_file),
            run_count_path: dir.join(&config.run_count_file),
            dir,
        }
    }
}
