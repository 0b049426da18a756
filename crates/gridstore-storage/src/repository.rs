//! Process-wide repository handle

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::backend::{ByteSink, ByteSource, StorageBackend, StoredObject};
use crate::error::StorageError;
use crate::name::ObjectName;

/// Shared handle over the single storage backend chosen at startup
///
/// Cloning is cheap; every clone refers to the same backend. Names are
/// validated here so backends only ever see well-formed names.
#[derive(Clone)]
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    closed: Arc<AtomicBool>,
}

impl Repository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Store the contents of `source` under `name`, replacing any previous object
    pub async fn store_streaming(
        &self,
        name: &str,
        source: ByteSource<'_>,
    ) -> Result<StoredObject, StorageError> {
        let name = self.check(name)?;
        self.backend.store_streaming(&name, source).await
    }

    /// Stream the object stored under `name` into `sink`
    pub async fn retrieve_streaming(
        &self,
        name: &str,
        sink: ByteSink<'_>,
    ) -> Result<u64, StorageError> {
        let name = self.check(name)?;
        self.backend.retrieve_streaming(&name, sink).await
    }

    /// Close the backend. Only the first call reaches the backend.
    pub async fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("Repository already closed");
            return Ok(());
        }

        info!("Closing repository");
        self.backend.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, name: &str) -> Result<ObjectName, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        ObjectName::parse(name)
    }
}
