//! GridFS storage backend
//!
//! Stores objects as chunked files in a MongoDB GridFS bucket, addressed
//! by filename. Storing a name twice creates a new revision; retrieval by
//! name always returns the most recent one.

use async_trait::async_trait;
use bson::{Bson, doc};
use mongodb::error::{ErrorKind, GridFsErrorKind};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::GridFsBucketOptions;
use mongodb::Client;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::compat::{FuturesAsyncReadCompatExt, FuturesAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::backend::{ByteSink, ByteSource, COPY_BUFFER_SIZE, StorageBackend, StoredObject};
use crate::error::StorageError;
use crate::name::ObjectName;

/// GridFS storage configuration
#[derive(Debug, Clone)]
pub struct GridFsConfig {
    /// MongoDB `host[:port]` to connect to
    pub url: String,
    /// Username to authenticate with
    pub username: Option<String>,
    /// Password to authenticate with
    pub password: Option<String>,
    /// Database holding the bucket
    pub database: String,
    /// GridFS bucket name
    pub bucket: String,
    /// Chunk size for new files; the driver default (255 KiB) when unset
    pub chunk_size_bytes: Option<u32>,
    /// Server selection and connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for GridFsConfig {
    fn default() -> Self {
        Self {
            url: "localhost:27017".to_string(),
            username: None,
            password: None,
            database: "test".to_string(),
            bucket: "example".to_string(),
            chunk_size_bytes: None,
            connect_timeout_ms: 3000,
        }
    }
}

impl GridFsConfig {
    /// Build the `mongodb://` connection URI from the configured parts
    ///
    /// Credentials are percent-encoded. A username without a password is
    /// allowed but logged as a warning.
    pub fn connection_uri(&self) -> String {
        let mut uri = String::from("mongodb://");

        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            uri.push_str(&urlencoding::encode(user));
            match self.password.as_deref().filter(|p| !p.is_empty()) {
                Some(pass) => {
                    uri.push(':');
                    uri.push_str(&urlencoding::encode(pass));
                }
                None => warn!("User '{}' given without password", user),
            }
            uri.push('@');
        }
        uri.push_str(&self.url);

        let separator = if self.url.contains('?') {
            '&'
        } else {
            if !self.url.contains('/') {
                uri.push('/');
            }
            '?'
        };
        uri.push(separator);
        uri.push_str(&format!(
            "serverSelectionTimeoutMS={0}&connectTimeoutMS={0}",
            self.connect_timeout_ms
        ));

        uri
    }
}

/// GridFS storage backend
pub struct GridFsStorage {
    client: Client,
    bucket: GridFsBucket,
}

impl GridFsStorage {
    /// Connect to MongoDB and open the configured bucket
    pub async fn new(config: GridFsConfig) -> Result<Self, StorageError> {
        if config.url.is_empty() {
            return Err(StorageError::Configuration(
                "MongoDB url is empty".to_string(),
            ));
        }

        let client = Client::with_uri_str(config.connection_uri())
            .await
            .map_err(|e| StorageError::GridFs(format!("connecting to '{}': {}", config.url, e)))?;

        let database = client.database(&config.database);

        // The bucket collections are created lazily on first write, so a
        // ping is what proves the database is reachable.
        database.run_command(doc! { "ping": 1 }).await.map_err(|e| {
            StorageError::GridFs(format!(
                "accessing bucket '{}' in '{}' on '{}': {}",
                config.bucket, config.database, config.url, e
            ))
        })?;

        let options = GridFsBucketOptions::builder()
            .bucket_name(config.bucket.clone())
            .chunk_size_bytes(config.chunk_size_bytes)
            .build();
        let bucket = database.gridfs_bucket(options);

        info!(
            "Initialized GridFS storage: url={}, database={}, bucket={}",
            config.url, config.database, config.bucket
        );

        Ok(Self { client, bucket })
    }
}

/// Convert a driver error for `name` into a storage error
fn gridfs_error(name: &ObjectName, err: mongodb::error::Error) -> StorageError {
    match *err.kind {
        ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }) => {
            StorageError::NotFound(name.to_string())
        }
        _ => StorageError::GridFs(format!("'{}': {}", name, err)),
    }
}

/// Render a GridFS file id for clients
fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl StorageBackend for GridFsStorage {
    async fn store_streaming(
        &self,
        name: &ObjectName,
        source: ByteSource<'_>,
    ) -> Result<StoredObject, StorageError> {
        debug!("Writing object stream to GridFS: {}", name);

        let upload = self
            .bucket
            .open_upload_stream(name.as_str())
            .await
            .map_err(|e| gridfs_error(name, e))?;
        let id = id_to_string(upload.id());

        let mut writer = upload.compat_write();
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source);

        // A failed upload is left to the driver's own cleanup; whether any
        // chunks remain visible is not defined here.
        let written = match tokio::io::copy_buf(&mut reader, &mut writer).await {
            Ok(n) => n,
            Err(e) => {
                warn!("GridFS upload of '{}' aborted after a stream error: {}", name, e);
                return Err(StorageError::Access {
                    name: name.to_string(),
                    source: e,
                });
            }
        };

        writer.shutdown().await.map_err(|e| StorageError::Access {
            name: name.to_string(),
            source: e,
        })?;

        debug!("Wrote {} bytes to GridFS file {} ({})", written, name, id);

        Ok(StoredObject {
            id: Some(id),
            name: name.to_string(),
        })
    }

    async fn retrieve_streaming(
        &self,
        name: &ObjectName,
        sink: ByteSink<'_>,
    ) -> Result<u64, StorageError> {
        debug!("Streaming object from GridFS: {}", name);

        let download = self
            .bucket
            .open_download_stream_by_name(name.as_str())
            .await
            .map_err(|e| gridfs_error(name, e))?;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, download.compat());
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
        info!("Disconnecting from MongoDB");
        self.client.clone().shutdown().await;
        Ok(())
    }
}
