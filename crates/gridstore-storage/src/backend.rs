//! Storage backend trait

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StorageError;
use crate::name::ObjectName;

/// Size of the buffer used by every copy loop between a stream and a backend
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Source of bytes for a store operation
pub type ByteSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Destination of bytes for a retrieve operation
pub type ByteSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Result of a successful store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Backend-assigned identifier, if the backend has one
    pub id: Option<String>,
    pub name: String,
}

/// Storage backend trait
///
/// Implementations store and retrieve opaque byte streams by name. Both
/// directions stream: neither side may hold a whole object in memory.
/// A store under an existing name replaces the previous content.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Consume `source` to completion and store it under `name`
    async fn store_streaming(
        &self,
        name: &ObjectName,
        source: ByteSource<'_>,
    ) -> Result<StoredObject, StorageError>;

    /// Stream the object stored under `name` into `sink`, returning the
    /// number of bytes written
    async fn retrieve_streaming(
        &self,
        name: &ObjectName,
        sink: ByteSink<'_>,
    ) -> Result<u64, StorageError>;

    /// Release resources held by the backend
    async fn close(&self) -> Result<(), StorageError>;
}
