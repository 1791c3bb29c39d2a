use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::eyre, Result};
use hoard_storage::key_derivation::{DeviceFingerprint, KdfParams, DEFAULT_KDF_ITERATIONS};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// `config.toml` under the platform config dir, e.g. `~/.config/hoard/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Where the backing files live; defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// PBKDF2 iteration count; must not go below the library minimum.
    pub kdf_iterations: Option<u32>,
    /// Pins the device fingerprint instead of detecting it.
    pub device_id: Option<String>,
}

/// Outcome of `Config::init_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyPresent,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|base| base.join("hoard").join(CONFIG_FILE))
            .ok_or_else(|| eyre!("no config dir available"))
    }

    /// Load from the platform path.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::path()?)
    }

    /// A missing file, or one with only whitespace, means defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let contents = match fs::read_to_string(path.as_ref()) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&contents).map_err(|e| eyre!("invalid {}: {e}", path.as_ref().display()))
    }

    /// Write `self` to `path` unless something is already there; user edits
    /// are never clobbered.
    pub fn init_at(&self, path: &Path) -> Result<InitOutcome> {
        if path.exists() {
            return Ok(InitOutcome::AlreadyPresent);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(InitOutcome::Created)
    }

    /// KDF parameters, validated against the minimum iteration count.
    pub fn kdf_params(&self) -> Result<KdfParams> {
        let params = KdfParams {
            iterations: self
                .storage
                .as_ref()
                .and_then(|s| s.kdf_iterations)
                .unwrap_or(DEFAULT_KDF_ITERATIONS),
        };
        params
            .validate()
            .map_err(|e| eyre!("invalid [storage] config: {e}"))?;
        Ok(params)
    }

    pub fn fingerprint(&self) -> DeviceFingerprint {
        match self.storage.as_ref().and_then(|s| s.device_id.as_deref()) {
            Some(id) => DeviceFingerprint::new(id),
            None => DeviceFingerprint::detect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_section(kdf_iterations: Option<u32>, device_id: Option<&str>) -> Config {
        Config {
            data_dir: None,
            storage: Some(StorageConfig {
                kdf_iterations,
                device_id: device_id.map(str::to_string),
            }),
        }
    }

    #[test]
    fn absent_or_blank_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = Config::load_from(dir.path().join(CONFIG_FILE)).expect("load");
        assert_eq!(missing, Config::default());

        let blank = dir.path().join("blank.toml");
        fs::write(&blank, "  \n").expect("write");
        assert_eq!(Config::load_from(&blank).expect("load"), Config::default());
    }

    #[test]
    fn storage_section_drives_kdf_and_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "data_dir = \"/srv/hoard\"\n[storage]\nkdf_iterations = 250000\ndevice_id = \"laptop-01\"\n",
        )
        .expect("write");

        let cfg = Config::load_from(&path).expect("load");
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/srv/hoard")));
        assert_eq!(cfg.kdf_params().expect("valid").iterations, 250_000);
        assert_eq!(cfg.fingerprint(), DeviceFingerprint::new("laptop-01"));
    }

    #[test]
    fn defaults_use_library_iteration_count() {
        let params = Config::default().kdf_params().expect("defaults are valid");
        assert_eq!(params.iterations, DEFAULT_KDF_ITERATIONS);
    }

    #[test]
    fn weak_iteration_count_is_rejected() {
        let err = storage_section(Some(10), None)
            .kdf_params()
            .expect_err("below minimum");
        assert!(err.to_string().contains("[storage]"));
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "data_dir = [").expect("write");

        let err = Config::load_from(&path).expect_err("parse error");
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn init_never_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let pinned = storage_section(None, Some("ci-runner"));

        assert_eq!(pinned.init_at(&path).expect("init"), InitOutcome::Created);
        assert_eq!(
            Config::default().init_at(&path).expect("init again"),
            InitOutcome::AlreadyPresent
        );
        assert_eq!(Config::load_from(&path).expect("load"), pinned);
    }
}
