use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use base64::{engine::general_purpose, Engine as _};
use hoard_core::backend::Backend;
use sha2::Sha256;
use tokio::sync::OnceCell;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::{CryptoError, StorageError},
    random::RandomSource,
};

/// Backend key holding the installation salt.
pub const SALT_KEY: &str = "secure-storage-salt";
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// Lowest iteration count accepted from user configuration.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

const APP_ID: &str = "hoard";

/// Stable, non-secret description of the device. Makes the derived key
/// device-specific; it is not a source of entropy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the fingerprint from platform attributes that survive restarts
    /// and upgrades (no version numbers).
    ///
    /// The core count is the parallelism visible to this process, which CPU
    /// affinity (`taskset`) and container CPU quotas can change. A process
    /// started under different limits derives a different key, cannot open
    /// earlier records, and falls back to plaintext. Deployments where those
    /// limits vary should pin the fingerprint with [`DeviceFingerprint::new`]
    /// (the CLI's `[storage] device_id`).
    pub fn detect() -> Self {
        let locale = ["LC_ALL", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.is_empty())
            .unwrap_or_else(|| "C".to_string());
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self(format!(
            "{APP_ID}|{locale}|{}|{}|{}|{cores}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::env::consts::FAMILY,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-installation random salt. Written once, never regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    fn encode(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    fn decode(raw: &[u8]) -> Result<Self, CryptoError> {
        let bytes = general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| CryptoError::KeyDerivation(format!("salt decode: {e}")))?;

        let bytes: [u8; SALT_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CryptoError::KeyDerivation(format!(
                "expected {SALT_LEN} salt bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// 256-bit symmetric key. Lives only in memory and is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey {
    bytes: [u8; KEY_LEN],
}

impl DeviceKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "kdf iterations must be >= {MIN_KDF_ITERATIONS}, got {}",
                self.iterations
            )));
        }
        Ok(())
    }
}

/// PBKDF2-HMAC-SHA256 over the fingerprint, salted with the installation salt.
pub fn derive_key(fingerprint: &DeviceFingerprint, salt: &Salt, iterations: u32) -> DeviceKey {
    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        fingerprint.as_str().as_bytes(),
        salt.as_bytes(),
        iterations,
        &mut bytes,
    );
    let key = DeviceKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

/// Owns the device key for one storage instance.
///
/// Salt lookup and derivation are each single-flight: concurrent first
/// callers wait on the same initialization, so only one salt is ever
/// persisted and the KDF runs once.
#[derive(Debug)]
pub struct KeyDerivation {
    fingerprint: DeviceFingerprint,
    params: KdfParams,
    salt: OnceCell<Salt>,
    key: OnceCell<DeviceKey>,
    kdf_runs: AtomicUsize,
}

impl KeyDerivation {
    pub fn new(fingerprint: DeviceFingerprint, params: KdfParams) -> Self {
        Self {
            fingerprint,
            params,
            salt: OnceCell::new(),
            key: OnceCell::new(),
            kdf_runs: AtomicUsize::new(0),
        }
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    /// How many times the KDF has been started by this instance.
    pub fn kdf_runs(&self) -> usize {
        self.kdf_runs.load(Ordering::SeqCst)
    }

    /// Read the persisted salt, creating and persisting it on first use.
    pub async fn get_salt<B: Backend + ?Sized>(
        &self,
        backend: &B,
        rng: &dyn RandomSource,
    ) -> Result<Salt, StorageError> {
        self.salt
            .get_or_try_init(|| load_or_create_salt(backend, rng))
            .await
            .copied()
    }

    /// The memoized device key, deriving it on first call.
    pub async fn device_key<B: Backend + ?Sized>(
        &self,
        backend: &B,
        rng: &dyn RandomSource,
    ) -> Result<&DeviceKey, StorageError> {
        self.key
            .get_or_try_init(|| self.derive(backend, rng))
            .await
    }

    async fn derive<B: Backend + ?Sized>(
        &self,
        backend: &B,
        rng: &dyn RandomSource,
    ) -> Result<DeviceKey, StorageError> {
        let salt = self.get_salt(backend, rng).await?;
        let fingerprint = self.fingerprint.clone();
        let iterations = self.params.iterations;

        self.kdf_runs.fetch_add(1, Ordering::SeqCst);
        debug!(iterations, "deriving device key");
        // The KDF is deliberately slow; keep it off the async workers.
        tokio::task::spawn_blocking(move || derive_key(&fingerprint, &salt, iterations))
            .await
            .map_err(|e| StorageError::from(CryptoError::KeyDerivation(format!("kdf task: {e}"))))
    }
}

async fn load_or_create_salt<B: Backend + ?Sized>(
    backend: &B,
    rng: &dyn RandomSource,
) -> Result<Salt, StorageError> {
    if let Some(raw) = backend.read(SALT_KEY).await? {
        // A damaged salt is reported, never replaced: replacing it would
        // orphan every record sealed so far.
        return Ok(Salt::decode(&raw)?);
    }

    let mut bytes = [0u8; SALT_LEN];
    rng.fill(&mut bytes)?;
    let salt = Salt(bytes);
    backend.write(SALT_KEY, salt.encode().as_bytes()).await?;
    debug!("persisted new installation salt");
    Ok(salt)
}
