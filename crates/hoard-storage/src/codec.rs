use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{CryptoError, StorageError},
    key_derivation::{DeviceKey, KEY_LEN},
    random::RandomSource,
};

pub const IV_LEN: usize = 12;

/// One sealed value as persisted in the backend: a single JSON object so
/// the IV and ciphertext are always written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Base64 of the 12-byte GCM nonce.
    pub iv: String,
    /// Base64 of the ciphertext with the authentication tag appended.
    pub ciphertext: String,
}

impl EncryptedRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(raw)
            .map_err(|e| CryptoError::DecryptionFailed(format!("malformed record: {e}")))
    }
}

/// AES-256-GCM codec for JSON values.
pub struct EncryptionCodec<'a> {
    rng: &'a dyn RandomSource,
}

impl<'a> EncryptionCodec<'a> {
    pub fn new(rng: &'a dyn RandomSource) -> Self {
        Self { rng }
    }

    /// Serialize and seal a value under a fresh random IV.
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        key: &DeviceKey,
        value: &T,
    ) -> Result<EncryptedRecord, StorageError> {
        let plaintext = serde_json::to_vec(value)?;
        let cipher = build_cipher(key)?;

        // IVs are never reused: every call draws a new one.
        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut iv)?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedRecord {
            iv: STANDARD.encode(iv),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    /// Open a record and parse the plaintext. Every failure, including a
    /// parse error after successful authentication, is `DecryptionFailed`.
    pub fn decrypt(&self, key: &DeviceKey, record: &EncryptedRecord) -> Result<Value, CryptoError> {
        let iv = STANDARD
            .decode(&record.iv)
            .map_err(|e| CryptoError::DecryptionFailed(format!("iv decode: {e}")))?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::DecryptionFailed(format!(
                "expected {IV_LEN} byte iv, got {}",
                iv.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(&record.ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("ciphertext decode: {e}")))?;

        let cipher = build_cipher(key)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".into()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not json: {e}")))
    }

    /// Seal and open a probe under a throwaway key to confirm the RNG and
    /// AEAD are usable on this host.
    pub fn self_test(&self) -> Result<(), CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        self.rng.fill(&mut bytes)?;
        let key = DeviceKey::from_bytes(bytes);

        let probe = Value::String("probe".into());
        let record = self.encrypt(&key, &probe).map_err(|e| match e {
            StorageError::Crypto(err) => err,
            other => CryptoError::PrimitiveUnavailable(other.to_string()),
        })?;
        let opened = self
            .decrypt(&key, &record)
            .map_err(|e| CryptoError::PrimitiveUnavailable(e.to_string()))?;
        if opened != probe {
            return Err(CryptoError::PrimitiveUnavailable(
                "aead self-test mismatch".into(),
            ));
        }
        Ok(())
    }
}

fn build_cipher(key: &DeviceKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::PrimitiveUnavailable(format!("cipher init failed: {e}")))
}
