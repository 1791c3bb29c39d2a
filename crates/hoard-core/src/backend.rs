use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

/// Errors produced by the persistent store underneath the storage layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Underlying storage failure (I/O, lock poisoning, permissions).
    #[error("storage failure: {reason}")]
    Io { reason: String },
    /// The store cannot be reached at all.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Byte-oriented key-value store the secure layer writes into.
///
/// Implementations only need per-key atomicity: a `write` either fully
/// replaces the previous entry or leaves it untouched.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the raw entry for a key, `None` when absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Persist an entry under a key, overwriting any existing one.
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Remove a key and its entry (idempotent).
    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Enumerate every key currently stored.
    async fn list_keys(&self) -> Result<Vec<String>, BackendError>;
}

/// In-memory backend for tests and ephemeral sessions.
/// Clones share the same underlying map, which lets two storage instances
/// observe the same bytes (e.g. to simulate a process restart).
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, BackendError> {
        self.inner.lock().map_err(|err| BackendError::Io {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    #[instrument(skip_all, fields(key))]
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.lock()?.get(key).cloned())
    }

    #[instrument(skip_all, fields(key))]
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[instrument(skip_all, fields(key))]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        (**self).write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, BackendError> {
        (**self).list_keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_returns_bytes() {
        let backend = InMemoryBackend::new();
        backend.write("k", b"payload").await.expect("write");

        let read = backend.read("k").await.expect("read");
        assert_eq!(read.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.read("absent").await.expect("read"), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_data() {
        let backend = InMemoryBackend::new();
        backend.write("k", b"v").await.expect("write");
        backend.delete("k").await.expect("delete");
        backend.delete("k").await.expect("delete again should still succeed");

        assert_eq!(backend.read("k").await.expect("read"), None);
    }

    #[tokio::test]
    async fn clones_share_state_and_list_keys() {
        let backend = InMemoryBackend::new();
        let other = backend.clone();
        backend.write("b", b"2").await.expect("write");
        other.write("a", b"1").await.expect("write");

        let keys = backend.list_keys().await.expect("list");
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn arc_wrapper_delegates() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        backend.write("k", b"v").await.expect("write");
        assert_eq!(backend.list_keys().await.expect("list"), vec!["k".to_string()]);
    }
}
