//! API error types

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use gridstore_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{action} '{name}': {source}")]
    Storage {
        action: &'static str,
        name: String,
        #[source]
        source: StorageError,
    },
}

impl ApiError {
    /// Wrap a storage failure with the operation and object name it hit
    pub fn storage(action: &'static str, name: &str, source: StorageError) -> Self {
        ApiError::Storage {
            action,
            name: name.to_string(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Storage { source, .. } => match source {
                StorageError::InvalidName(_) | StorageError::OutsideRoot(_) => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                // Absent objects are reported like any other backend failure.
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::MethodNotAllowed = self {
            return (status, [(header::ALLOW, "GET, POST")], self.to_string()).into_response();
        }

        (status, self.to_string()).into_response()
    }
}
