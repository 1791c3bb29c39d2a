use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hoard_core::backend::{Backend, BackendError};
use tempfile::NamedTempFile;
use tracing::instrument;

/// Directory-backed store: one file per key, replaced atomically on write.
/// File names are the URL-safe base64 of the key, so any key string is a
/// valid file name.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

#[async_trait]
impl Backend for FileBackend {
    #[instrument(skip_all, fields(key))]
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(err)),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(io_err)?;
        Ok(Some(buf))
    }

    #[instrument(skip_all, fields(key))]
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        fs::create_dir_all(&self.root).map_err(io_err)?;
        write_atomic(&self.path_for(key), value)
    }

    #[instrument(skip_all, fields(key))]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, BackendError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            // Temp files and foreign files do not decode; skip them.
            if let Some(key) = entry.file_name().to_str().and_then(unsanitize_key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn write_atomic(path: &Path, value: &[u8]) -> Result<(), BackendError> {
    let parent = path.parent().ok_or_else(|| BackendError::Io {
        reason: "invalid storage path".to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(value).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn unsanitize_key(name: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(name).ok()?;
    String::from_utf8(bytes).ok()
}

fn io_err<E: ToString>(err: E) -> BackendError {
    BackendError::Io {
        reason: err.to_string(),
    }
}
