//! Local disk storage backend

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::backend::{ByteSink, ByteSource, COPY_BUFFER_SIZE, StorageBackend, StoredObject};
use crate::error::StorageError;
use crate::name::ObjectName;

/// Local disk storage backend
///
/// Stores every object as a single file directly inside the base
/// directory: `<base_path>/<name>`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend
    ///
    /// A missing base directory is created. A base path that exists but is
    /// not a directory is rejected.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let display = base_path.display().to_string();

        match fs::metadata(&base_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::NotADirectory(display)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut builder = fs::DirBuilder::new();
                builder.recursive(true);
                #[cfg(unix)]
                builder.mode(0o750);
                builder.create(&base_path).await.map_err(|e| {
                    StorageError::Configuration(format!("creating '{}': {}", display, e))
                })?;
                info!("Created storage directory {:?}", base_path);
            }
            Err(e) => return Err(StorageError::from_io(&display, e)),
        }

        // Resolve symlinks and relative segments once so the prefix check
        // in object_path compares against a stable root.
        let base_path = fs::canonicalize(&base_path)
            .await
            .map_err(|e| StorageError::from_io(&display, e))?;

        info!("Initialized local storage at {:?}", base_path);

        Ok(Self { base_path })
    }

    /// Directory objects are stored in
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for an object name
    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(StorageError::OutsideRoot(name.to_string())),
        }

        let path = self.base_path.join(name);
        if path.parent() != Some(self.base_path.as_path()) {
            return Err(StorageError::OutsideRoot(name.to_string()));
        }

        Ok(path)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn store_streaming(
        &self,
        name: &ObjectName,
        source: ByteSource<'_>,
    ) -> Result<StoredObject, StorageError> {
        let path = self.object_path(name.as_str())?;
        debug!("Writing object stream to {:?}", path);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o640);

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| StorageError::from_io(name.as_str(), e))?;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source);
        let written = tokio::io::copy_buf(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::Access {
                name: name.to_string(),
                source: e,
            })?;

        file.flush().await.map_err(|e| StorageError::Access {
            name: name.to_string(),
            source: e,
        })?;

        debug!("Wrote {} bytes to {:?}", written, path);

        Ok(StoredObject {
            id: None,
            name: name.to_string(),
        })
    }

    async fn retrieve_streaming(
        &self,
        name: &ObjectName,
        sink: ByteSink<'_>,
    ) -> Result<u64, StorageError> {
        let path = self.object_path(name.as_str())?;
        debug!("Streaming object from {:?}", path);

        let file = File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(name.as_str(), e))?;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
        let written = tokio::io::copy_buf(&mut reader, &mut *sink)
            .await
            .map_err(|e| StorageError::Access {
                name: name.to_string(),
                source: e,
            })?;

        sink.flush().await.map_err(|e| StorageError::Access {
            name: name.to_string(),
            source: e,
        })?;

        Ok(written)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
