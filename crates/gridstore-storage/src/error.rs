//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("'{0}' resolves outside the storage root")]
    OutsideRoot(String),

    #[error("Wrong permissions to access '{0}'")]
    PermissionDenied(String),

    #[error("accessing '{name}': {source}")]
    Access {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not a directory")]
    NotADirectory(String),

    #[error("GridFS error: {0}")]
    GridFs(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Repository is closed")]
    Closed,
}

impl StorageError {
    /// Map an I/O error raised while touching `name` into the storage taxonomy.
    pub fn from_io(name: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                StorageError::PermissionDenied(name.to_string())
            }
            _ => StorageError::Access {
                name: name.to_string(),
                source: err,
            },
        }
    }

    /// Whether the error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
