use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use hoard_core::backend::Backend;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    codec::{EncryptedRecord, EncryptionCodec},
    error::{CryptoError, StorageError},
    fallback::{parse_plain, FallbackStore},
    key_derivation::{DeviceFingerprint, KdfParams, KeyDerivation, SALT_KEY},
    random::{OsRandom, RandomSource},
};

/// Prefix for backend keys holding encrypted records.
pub const NAMESPACE_PREFIX: &str = "secure-storage-";
/// Prefix for backups written by `migrate_legacy`.
pub const LEGACY_PREFIX: &str = "__legacy__";

/// Operating mode. `Fallback` is terminal for the lifetime of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    CryptoAvailable,
    Fallback,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::CryptoAvailable => f.write_str("encrypted"),
            Mode::Fallback => f.write_str("plaintext fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub kdf: KdfParams,
}

/// Outcome of a `migrate_legacy` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Plain keys that were re-written encrypted and backed up.
    pub migrated: Vec<String>,
    /// True when entries were left in place because encryption is unavailable.
    pub skipped: bool,
    /// Plain keys left untouched because their name is reserved.
    pub reserved: Vec<String>,
}

/// Encrypted key-value storage with sticky degradation to plaintext.
///
/// Cryptographic failures never reach the caller: the first one flips the
/// instance into [`Mode::Fallback`] and the operation is served from the
/// plaintext path. Backend failures are always returned.
pub struct SecureStorage<B: Backend, R: RandomSource = OsRandom> {
    backend: B,
    rng: R,
    keys: KeyDerivation,
    fallback: AtomicBool,
}

impl<B: Backend> SecureStorage<B, OsRandom> {
    pub fn new(backend: B, fingerprint: DeviceFingerprint) -> Self {
        Self::with_options(backend, fingerprint, StorageOptions::default())
    }

    pub fn with_options(backend: B, fingerprint: DeviceFingerprint, options: StorageOptions) -> Self {
        Self::with_random(backend, fingerprint, options, OsRandom)
    }
}

impl<B: Backend, R: RandomSource> SecureStorage<B, R> {
    /// Build a storage instance over an explicit random source. The RNG and
    /// AEAD are probed here; if either is unusable the instance starts in
    /// fallback mode.
    pub fn with_random(
        backend: B,
        fingerprint: DeviceFingerprint,
        options: StorageOptions,
        rng: R,
    ) -> Self {
        let storage = Self {
            backend,
            rng,
            keys: KeyDerivation::new(fingerprint, options.kdf),
            fallback: AtomicBool::new(false),
        };
        if let Err(err) = storage.codec().self_test() {
            storage.fall_back(&err);
        }
        storage
    }

    pub fn mode(&self) -> Mode {
        if self.fallback.load(Ordering::SeqCst) {
            Mode::Fallback
        } else {
            Mode::CryptoAvailable
        }
    }

    pub fn is_crypto_available(&self) -> bool {
        self.mode() == Mode::CryptoAvailable
    }

    /// Fetch a value, `None` when nothing is stored under `key`.
    #[instrument(skip_all, fields(key))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        validate_key(key)?;
        if self.is_crypto_available() {
            match self.get_encrypted(key).await {
                Ok(value) => return decode_value(value),
                Err(StorageError::Crypto(err)) => self.fall_back(&err),
                Err(err) => return Err(err),
            }
        }
        decode_value(self.plain().get(key).await?)
    }

    /// Store a value, overwriting any previous one.
    #[instrument(skip_all, fields(key))]
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        validate_key(key)?;
        if self.is_crypto_available() {
            match self.set_encrypted(key, value).await {
                Ok(()) => return Ok(()),
                Err(StorageError::Crypto(err)) => self.fall_back(&err),
                Err(err) => return Err(err),
            }
        }
        self.plain().set(key, value).await
    }

    /// Delete the stored representation of `key` (idempotent).
    #[instrument(skip_all, fields(key))]
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.backend.delete(&namespaced(key)).await?;
        if self.mode() == Mode::Fallback {
            // An encrypted record left behind would resurface in the next
            // process once encryption works again.
            self.plain().remove(key).await?;
        }
        Ok(())
    }

    /// Move plain entries written before this layer existed into encrypted
    /// storage, keeping a backup under `__legacy__<key>`.
    ///
    /// Reserved keys are never touched, so a second pass finds nothing to do.
    #[instrument(skip_all)]
    pub async fn migrate_legacy(&self) -> Result<MigrationReport, StorageError> {
        let mut report = MigrationReport::default();
        if !self.is_crypto_available() {
            warn!("encryption unavailable, leaving legacy entries in place");
            report.skipped = true;
            return Ok(report);
        }

        for key in self.backend.list_keys().await? {
            if is_storage_key(&key) {
                continue;
            }
            if validate_key(&key).is_err() {
                // Migrating it would overwrite storage-owned state.
                warn!(key = %key, "legacy entry uses a reserved name, leaving it in place");
                report.reserved.push(key);
                continue;
            }
            let Some(raw) = self.backend.read(&key).await? else {
                continue;
            };

            // Bypass set(): its plaintext retry would rewrite the legacy bytes.
            match self.set_encrypted(&key, &parse_plain(&raw)).await {
                Ok(()) => {}
                Err(StorageError::Crypto(err)) => {
                    self.fall_back(&err);
                    warn!(key = %key, "encryption failed during migration, stopping");
                    report.skipped = true;
                    break;
                }
                Err(err) => return Err(err),
            }

            self.backend.write(&legacy_key(&key), &raw).await?;
            self.backend.delete(&key).await?;
            debug!(key = %key, "migrated legacy entry");
            report.migrated.push(key);
        }

        info!(migrated = report.migrated.len(), "legacy migration finished");
        Ok(report)
    }

    async fn get_encrypted(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self.backend.read(&namespaced(key)).await? else {
            return Ok(None);
        };
        let record = EncryptedRecord::from_bytes(&raw)?;
        let device_key = self.keys.device_key(&self.backend, &self.rng).await?;
        Ok(Some(self.codec().decrypt(device_key, &record)?))
    }

    async fn set_encrypted<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let device_key = self.keys.device_key(&self.backend, &self.rng).await?;
        let record = self.codec().encrypt(device_key, value)?;
        // IV and ciphertext go out as one entry; never split them.
        self.backend.write(&namespaced(key), &record.to_bytes()?).await?;
        Ok(())
    }

    fn fall_back(&self, err: &CryptoError) {
        if !self.fallback.swap(true, Ordering::SeqCst) {
            warn!(error = %err, "switching to plaintext storage for this process");
        }
    }

    fn codec(&self) -> EncryptionCodec<'_> {
        EncryptionCodec::new(&self.rng)
    }

    fn plain(&self) -> FallbackStore<'_, B> {
        FallbackStore::new(&self.backend)
    }
}

fn namespaced(key: &str) -> String {
    format!("{NAMESPACE_PREFIX}{key}")
}

fn legacy_key(key: &str) -> String {
    format!("{LEGACY_PREFIX}{key}")
}

/// Keys this layer writes itself: the salt, encrypted records, and backups.
fn is_storage_key(key: &str) -> bool {
    key.starts_with(NAMESPACE_PREFIX) || key.starts_with(LEGACY_PREFIX)
}

/// Logical keys must not alias the salt, encrypted records, or backups in
/// either mode.
fn validate_key(key: &str) -> Result<(), StorageError> {
    if is_storage_key(key) || namespaced(key) == SALT_KEY {
        return Err(StorageError::ReservedKey(key.to_string()));
    }
    Ok(())
}

fn decode_value<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>, StorageError> {
    Ok(value.map(serde_json::from_value).transpose()?)
}
