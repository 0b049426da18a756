//! Gridstore - stores named byte streams on local disk or in MongoDB GridFS
//!
//! Upload with
//!
//! ```text
//! curl --data-binary "@/path/to/beautiful.png" http://localhost:9090/files/beautiful.png
//! ```
//!
//! and download with
//!
//! ```text
//! curl -O http://localhost:9090/files/beautiful.png
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{BackendKind, Config, StorageConfig};
use gridstore_api::{AppState, create_router, routes::metrics};
use gridstore_storage::{GridFsStorage, LocalStorage, Repository, StorageBackend};

/// Gridstore - minimal binary object storage over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Address to listen on
    #[arg(long, env = "GRIDSTORE_LISTEN")]
    listen: Option<String>,

    /// Storage backend to use
    #[arg(long, env = "GRIDSTORE_BACKEND", value_enum)]
    backend: Option<BackendKind>,

    /// Base directory for the file backend
    #[arg(long, env = "GRIDSTORE_PATH")]
    path: Option<String>,

    /// MongoDB host[:port] to connect to
    #[arg(long, env = "GRIDSTORE_MONGO_URL")]
    url: Option<String>,

    /// Username to authenticate against MongoDB
    #[arg(long, env = "GRIDSTORE_MONGO_USER")]
    user: Option<String>,

    /// Password to use for authentication
    #[arg(long, env = "GRIDSTORE_MONGO_PASS", hide_env_values = true)]
    pass: Option<String>,

    /// Database holding the GridFS bucket
    #[arg(long, env = "GRIDSTORE_MONGO_DB")]
    db: Option<String>,

    /// GridFS bucket to use
    #[arg(long, env = "GRIDSTORE_BUCKET")]
    bucket: Option<String>,
}

impl Args {
    /// Override file configuration with anything given on the command line
    fn apply(self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }
        if let Some(path) = self.path {
            config.storage.file.path = path;
        }

        let gridfs = &mut config.storage.gridfs;
        if let Some(url) = self.url {
            gridfs.url = url;
        }
        if self.user.is_some() {
            gridfs.username = self.user;
        }
        if self.pass.is_some() {
            gridfs.password = self.pass;
        }
        if let Some(db) = self.db {
            gridfs.database = db;
        }
        if let Some(bucket) = self.bucket {
            gridfs.bucket = bucket;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);

    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Gridstore v{}", env!("CARGO_PKG_VERSION"));

    let repository = open_repository(&config.storage).await?;

    let metrics_handle = if config.metrics.enabled {
        Some(Arc::new(
            metrics::install_recorder().context("Failed to install metrics recorder")?,
        ))
    } else {
        None
    };

    let state = AppState::new(repository.clone());
    let app = create_router(state, metrics_handle).layer(TraceLayer::new_for_http());

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Starting webserver on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = repository.close().await {
        error!("Closing repository failed: {}", e);
    }

    served?;
    info!("Server stopped");
    Ok(())
}

/// Build the one storage backend this process serves from
async fn open_repository(config: &StorageConfig) -> Result<Repository> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::File => Arc::new(
            LocalStorage::new(&config.file.path)
                .await
                .with_context(|| format!("Failed to open file storage at '{}'", config.file.path))?,
        ),
        BackendKind::Gridfs => Arc::new(
            GridFsStorage::new(config.gridfs.to_backend_config())
                .await
                .with_context(|| {
                    format!(
                        "Failed to open GridFS bucket '{}' in '{}' on '{}'",
                        config.gridfs.bucket, config.gridfs.database, config.gridfs.url
                    )
                })?,
        ),
    };

    Ok(Repository::new(backend))
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
