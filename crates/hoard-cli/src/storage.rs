use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use hoard_storage::{file_backend::FileBackend, SecureStorage, StorageOptions};
use tracing::debug;

/// Resolve the default data directory for Hoard.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("hoard"))
}

/// Build the encrypted store described by the config.
pub fn store_from_config(config: &Config) -> Result<SecureStorage<FileBackend>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let fingerprint = config.fingerprint();
    let options = StorageOptions {
        kdf: config.kdf_params()?,
    };

    debug!(?root, "initializing secure storage");
    Ok(SecureStorage::with_options(
        FileBackend::new(root),
        fingerprint,
        options,
    ))
}

/// Helper for tests to construct a store rooted at a temp dir with a cheap KDF.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> SecureStorage<FileBackend> {
    SecureStorage::with_options(
        FileBackend::new(root),
        hoard_storage::key_derivation::DeviceFingerprint::new("test-device"),
        StorageOptions {
            kdf: hoard_storage::key_derivation::KdfParams { iterations: 1_000 },
        },
    )
}
