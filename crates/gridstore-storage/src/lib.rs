//! Gridstore Storage Layer
//!
//! This crate provides the storage abstraction for Gridstore,
//! supporting local disk and MongoDB GridFS backends.

pub mod backend;
pub mod error;
pub mod gridfs;
pub mod local;
pub mod name;
pub mod repository;

pub use backend::{ByteSink, ByteSource, COPY_BUFFER_SIZE, StorageBackend, StoredObject};
pub use error::StorageError;
pub use gridfs::{GridFsConfig, GridFsStorage};
pub use local::LocalStorage;
pub use name::ObjectName;
pub use repository::Repository;
