//! Object upload and download

use axum::{
    Json,
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use gridstore_storage::{COPY_BUFFER_SIZE, StorageError, name::is_name_char};
use serde::Serialize;
use std::io;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Uploads are cut off after this many bytes
pub const MAX_UPLOAD_SIZE: u64 = 32 << 20;

/// Path prefix every object URL starts with
pub const FILES_PREFIX: &str = "/files/";

/// Shape of an object URL, for logging
pub const FILES_PATTERN: &str = "^/files/([A-Za-z0-9_.]*)$";

/// Response body of a successful upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Extract the object name from a request target (path plus query).
///
/// Returns `None` unless the whole target is `/files/<name>` with `<name>`
/// made of name characters only. The name may be empty; that is for the
/// repository to reject.
pub fn extract_name(path: &str) -> Option<&str> {
    let name = path.strip_prefix(FILES_PREFIX)?;
    name.chars().all(is_name_char).then_some(name)
}

/// GET /files/{name}
///
/// The retrieve runs on its own task and writes into an in-memory pipe
/// whose read half becomes the response body. The status is settled by
/// the first chunk: a failure before any byte arrives is a 500, a failure
/// after that aborts the body stream.
pub async fn download(state: &AppState, name: &str) -> Result<Response, ApiError> {
    let (mut writer, reader) = tokio::io::duplex(COPY_BUFFER_SIZE);
    let repository = state.repository.clone();
    let owned = name.to_string();

    let task = tokio::spawn(async move {
        let result = repository.retrieve_streaming(&owned, &mut writer).await;
        match &result {
            Ok(written) => {
                metrics::counter!("gridstore_download_bytes_total").increment(*written);
                debug!("Sent {} bytes of '{}'", written, owned);
            }
            Err(e) => warn!("Download of '{}' failed: {}", owned, e),
        }
        result
    });

    let mut body = ReaderStream::with_capacity(reader, COPY_BUFFER_SIZE);

    match body.next().await {
        Some(Ok(first)) => {
            let tail = stream::once(join_retrieve(task)).filter_map(|result| async move {
                result
                    .err()
                    .map(|e| Err::<Bytes, io::Error>(io::Error::other(e.to_string())))
            });
            let stream = stream::once(async move { Ok::<Bytes, io::Error>(first) })
                .chain(body)
                .chain(tail);

            metrics::counter!("gridstore_downloads_total").increment(1);
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                Body::from_stream(stream),
            )
                .into_response())
        }
        Some(Err(e)) => {
            task.abort();
            Err(ApiError::storage("retrieving", name, StorageError::Io(e)))
        }
        None => {
            join_retrieve(task)
                .await
                .map_err(|e| ApiError::storage("retrieving", name, e))?;

            metrics::counter!("gridstore_downloads_total").increment(1);
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                Body::empty(),
            )
                .into_response())
        }
    }
}

async fn join_retrieve(task: JoinHandle<Result<u64, StorageError>>) -> Result<u64, StorageError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(StorageError::Io(io::Error::other(e))),
    }
}

/// POST /files/{name}
///
/// The request body is read through a reader capped at
/// [`MAX_UPLOAD_SIZE`]; anything past the cap is ignored.
pub async fn upload(state: &AppState, name: &str, body: Body) -> Result<Response, ApiError> {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut source = StreamReader::new(stream).take(MAX_UPLOAD_SIZE);

    match state.repository.store_streaming(name, &mut source).await {
        Ok(stored) => {
            let received = MAX_UPLOAD_SIZE - source.limit();
            if source.limit() == 0 {
                debug!("Upload of '{}' reached the {} byte cap", name, MAX_UPLOAD_SIZE);
            }
            metrics::counter!("gridstore_uploads_total").increment(1);
            metrics::counter!("gridstore_upload_bytes_total").increment(received);

            Ok(Json(UploadResponse {
                id: stored.id,
                name: stored.name,
            })
            .into_response())
        }
        Err(e) => {
            // Consume what is left of the capped body before answering.
            if let Err(drain) = tokio::io::copy(&mut source, &mut tokio::io::sink()).await {
                debug!("Draining upload body of '{}' failed: {}", name, drain);
            }
            Err(ApiError::storage("uploading", name, e))
        }
    }
}
