use hoard_core::backend::Backend;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::StorageError;

/// Plaintext storage under the caller's own key. Used when encryption is
/// unavailable or has failed for this process.
pub struct FallbackStore<'a, B: Backend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: Backend + ?Sized> FallbackStore<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Read and parse a plain entry. Bytes that are not JSON come back as a
    /// string value.
    #[instrument(skip_all, fields(key))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.backend.read(key).await?.map(|raw| parse_plain(&raw)))
    }

    #[instrument(skip_all, fields(key))]
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.write(key, &bytes).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(key))]
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key).await?;
        Ok(())
    }
}

pub(crate) fn parse_plain(raw: &[u8]) -> Value {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use hoard_core::backend::InMemoryBackend;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn stores_json_in_plaintext() {
        let backend = InMemoryBackend::new();
        let store = FallbackStore::new(&backend);
        store.set("theme", &json!({"mode": "dark"})).await.expect("set");

        let raw = backend.read("theme").await.expect("read").expect("present");
        assert_eq!(raw, br#"{"mode":"dark"}"#.to_vec());
        assert_eq!(
            store.get("theme").await.expect("get"),
            Some(json!({"mode": "dark"}))
        );
    }

    #[tokio::test]
    async fn non_json_passes_through_as_string() {
        let backend = InMemoryBackend::new();
        backend.write("legacy", b"plain words").await.expect("write");

        let store = FallbackStore::new(&backend);
        assert_eq!(
            store.get("legacy").await.expect("get"),
            Some(Value::String("plain words".into()))
        );
    }

    #[tokio::test]
    async fn missing_and_removed_keys_are_none() {
        let backend = InMemoryBackend::new();
        let store = FallbackStore::new(&backend);
        assert_eq!(store.get("k").await.expect("get"), None);

        store.set("k", "v").await.expect("set");
        store.remove("k").await.expect("remove");
        assert_eq!(store.get("k").await.expect("get"), None);
    }
}
