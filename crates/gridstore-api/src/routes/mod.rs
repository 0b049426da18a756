//! API routes

pub mod files;
mod health;
pub mod metrics;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Method, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::{AppState, MetricsHandle};
use files::{FILES_PATTERN, extract_name};

/// Route a request for `/files/<name>` to the upload or download operation
///
/// Paths that do not fit the object URL shape get a 404 before any
/// storage call is made. Methods other than GET and POST get a 405.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Body,
) -> Response {
    // The query is part of what gets matched, so any `?` is a miss.
    let target = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());

    let Some(name) = extract_name(target) else {
        info!("404: '{}' does not match '{}'", target, FILES_PATTERN);
        ::metrics::counter!("gridstore_not_found_total").increment(1);
        return ApiError::NotFound(target.to_string()).into_response();
    };

    let (operation, result) = match method {
        Method::GET => ("download", files::download(&state, name).await),
        Method::POST => ("upload", files::upload(&state, name, body).await),
        _ => ("dispatch", Err(ApiError::MethodNotAllowed)),
    };

    match result {
        Ok(response) => {
            info!("{} '{}' {}", method, target, response.status().as_u16());
            response
        }
        Err(e) => {
            let status = e.status();
            warn!("{} '{}' {} {}", method, target, status.as_u16(), e);
            ::metrics::counter!("gridstore_errors_total", "operation" => operation).increment(1);
            e.into_response()
        }
    }
}

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Everything else goes through the object dispatcher
        .fallback(dispatch)
        .with_state(state)
        // Uploads are capped while streaming, not by the extractor limit
        .layer(DefaultBodyLimit::disable());

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode, header};
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use gridstore_storage::{
        ByteSink, ByteSource, LocalStorage, ObjectName, Repository, StorageBackend,
        StorageError, StoredObject,
    };
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;

    use super::files::MAX_UPLOAD_SIZE;

    async fn local_app() -> (Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path()).await.unwrap();
        let state = AppState::new(Repository::new(Arc::new(storage)));
        (create_router(state, None), temp_dir)
    }

    fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    /// Backend that counts calls and fails every operation
    #[derive(Default)]
    struct UnreachableBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for UnreachableBackend {
        async fn store_streaming(
            &self,
            _name: &ObjectName,
            _source: ByteSource<'_>,
        ) -> Result<StoredObject, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::GridFs("connection refused".to_string()))
        }

        async fn retrieve_streaming(
            &self,
            _name: &ObjectName,
            _sink: ByteSink<'_>,
        ) -> Result<u64, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::GridFs("connection refused".to_string()))
        }

        async fn close(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    /// Backend that sends a few bytes and then fails
    struct BrokenMidwayBackend;

    #[async_trait]
    impl StorageBackend for BrokenMidwayBackend {
        async fn store_streaming(
            &self,
            name: &ObjectName,
            _source: ByteSource<'_>,
        ) -> Result<StoredObject, StorageError> {
            Ok(StoredObject {
                id: Some("42".to_string()),
                name: name.to_string(),
            })
        }

        async fn retrieve_streaming(
            &self,
            name: &ObjectName,
            sink: ByteSink<'_>,
        ) -> Result<u64, StorageError> {
            sink.write_all(b"partial").await?;
            sink.flush().await?;
            Err(StorageError::GridFs(format!("'{}': chunk missing", name)))
        }

        async fn close(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (app, _dir) = local_app().await;

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/files/report.pdf", "ABC"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["Name"], "report.pdf");
        assert!(json["_id"].is_null());

        let response = app
            .oneshot(request(Method::GET, "/files/report.pdf", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"ABC");
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let (app, _dir) = local_app().await;

        for payload in ["first payload", "second"] {
            let response = app
                .clone()
                .oneshot(request(Method::POST, "/files/notes.txt", payload))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request(Method::GET, "/files/notes.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(body_bytes(response).await, b"second");
    }

    #[tokio::test]
    async fn test_download_empty_object() {
        let (app, _dir) = local_app().await;

        app.clone()
            .oneshot(request(Method::POST, "/files/empty", Body::empty()))
            .await
            .unwrap();

        let response = app
            .oneshot(request(Method::GET, "/files/empty", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_is_server_error() {
        let (app, _dir) = local_app().await;

        let response = app
            .oneshot(request(Method::GET, "/files/missing.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("missing.txt"));
    }

    #[tokio::test]
    async fn test_upload_is_truncated_at_cap() {
        let (app, _dir) = local_app().await;
        let payload = vec![7u8; MAX_UPLOAD_SIZE as usize + 1000];

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/files/big.bin", payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/files/big.bin", Body::empty()))
            .await
            .unwrap();
        assert_eq!(body_bytes(response).await.len() as u64, MAX_UPLOAD_SIZE);
    }

    #[tokio::test]
    async fn test_bad_paths_never_reach_backend() {
        let backend = Arc::new(UnreachableBackend::default());
        let state = AppState::new(Repository::new(backend.clone()));
        let app = create_router(state, None);

        for uri in [
            "/files/../etc/passwd",
            "/files/a/b",
            "/files/a%20b",
            "/files/a?b",
            "/files",
            "/other",
            "/",
        ] {
            let response = app
                .clone()
                .oneshot(request(Method::GET, uri, Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }

        for uri in ["/files/", "/files/.", "/files/.."] {
            let response = app
                .clone()
                .oneshot(request(Method::POST, uri, "data"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let backend = Arc::new(UnreachableBackend::default());
        let app = create_router(AppState::new(Repository::new(backend.clone())), None);

        for method in [Method::PUT, Method::DELETE, Method::PATCH] {
            let response = app
                .clone()
                .oneshot(request(method, "/files/a.txt", Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(response.headers()[header::ALLOW], "GET, POST");
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_server_error() {
        let backend = Arc::new(UnreachableBackend::default());
        let app = create_router(AppState::new(Repository::new(backend.clone())), None);

        // The backend fails without reading; the body must still be consumed.
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let chunks = stream::iter((0..4).map(|_| Ok::<_, io::Error>(Bytes::from(vec![1u8; 1024]))))
            .inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    counter.fetch_add(bytes.len(), Ordering::SeqCst);
                }
            });

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/files/a.txt", Body::from_stream(chunks)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("uploading 'a.txt'"));
        assert!(body.contains("connection refused"));
        assert_eq!(polled.load(Ordering::SeqCst), 4096);

        let response = app
            .oneshot(request(Method::GET, "/files/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_after_first_byte_aborts_body() {
        let app = create_router(
            AppState::new(Repository::new(Arc::new(BrokenMidwayBackend))),
            None,
        );

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/files/a.txt", "data"))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["_id"], "42");

        let response = app
            .oneshot(request(Method::GET, "/files/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_query_string_is_not_found() {
        let backend = Arc::new(UnreachableBackend::default());
        let app = create_router(AppState::new(Repository::new(backend.clone())), None);

        for uri in ["/files/a?b", "/files/report.pdf?x=1", "/files/a?"] {
            for method in [Method::GET, Method::POST] {
                let response = app
                    .clone()
                    .oneshot(request(method.clone(), uri, "data"))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
            }
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_body_error_is_server_error() {
        let (app, dir) = local_app().await;
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let response = app
            .oneshot(request(
                Method::POST,
                "/files/broken.bin",
                Body::from_stream(stream::iter(chunks)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("uploading 'broken.bin'"), "{}", body);
        assert!(body.contains("client went away"), "{}", body);

        // The file was opened before the body failed.
        assert!(dir.path().join("broken.bin").exists());
    }

    #[tokio::test]
    async fn test_closed_repository_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let repository = Repository::new(Arc::new(LocalStorage::new(temp_dir.path()).await.unwrap()));
        let app = create_router(AppState::new(repository.clone()), None);
        repository.close().await.unwrap();

        let response = app
            .oneshot(request(Method::GET, "/files/a.txt", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = local_app().await;

        let response = app
            .oneshot(request(Method::GET, "/health", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
