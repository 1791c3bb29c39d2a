use hoard_core::backend::BackendError;
use thiserror::Error;

/// Failures of the cryptographic path. These never reach callers of
/// `SecureStorage`; they switch the storage into fallback mode instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Secure RNG or AEAD primitive is missing or unusable on this host.
    #[error("cryptographic primitive unavailable: {0}")]
    PrimitiveUnavailable(String),
    /// Tag mismatch, malformed record, or undecodable plaintext.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    /// Salt could not be read/created or the KDF did not complete.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend itself failed; always propagated.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The value could not be serialized, or a stored value does not match
    /// the requested type.
    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The logical key would alias one of the reserved backend keys.
    #[error("key is reserved by the storage layer: {0}")]
    ReservedKey(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
