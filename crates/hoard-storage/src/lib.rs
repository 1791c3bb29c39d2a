//! Encrypted key-value storage on top of a `hoard_core::backend::Backend`.
//! Values are sealed with AES-256-GCM under a key derived from the device
//! fingerprint and a persisted salt; when cryptography is unusable the
//! storage degrades to plaintext for the rest of the process.

pub mod codec;
pub mod error;
pub mod fallback;
pub mod file_backend;
pub mod key_derivation;
pub mod random;
pub mod secure_storage;

pub use error::{CryptoError, StorageError};
pub use secure_storage::{MigrationReport, Mode, SecureStorage, StorageOptions};
