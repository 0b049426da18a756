//! Configuration loading

use anyhow::{Context, Result};
use gridstore_storage::GridFsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on; a bare `:port` listens on all interfaces
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ServerConfig {
    /// Listen address in a form `TcpListener::bind` accepts
    pub fn bind_address(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }
}

/// Which storage backend serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Files in a local directory
    #[default]
    File,
    /// MongoDB GridFS bucket
    Gridfs,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub file: FileStorageConfig,
    #[serde(default)]
    pub gridfs: GridFsStorageConfig,
}

/// Local directory storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    #[serde(default = "default_file_path")]
    pub path: String,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: default_file_path(),
        }
    }
}

/// GridFS storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridFsStorageConfig {
    /// MongoDB `host[:port]`
    #[serde(default = "default_mongo_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub chunk_size_bytes: Option<u32>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for GridFsStorageConfig {
    fn default() -> Self {
        Self {
            url: default_mongo_url(),
            username: None,
            password: None,
            database: default_database(),
            bucket: default_bucket(),
            chunk_size_bytes: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl GridFsStorageConfig {
    pub fn to_backend_config(&self) -> GridFsConfig {
        GridFsConfig {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            bucket: self.bucket.clone(),
            chunk_size_bytes: self.chunk_size_bytes,
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics on `/metrics`
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_file_path() -> String {
    "./data/files".to_string()
}

fn default_mongo_url() -> String {
    "localhost:27017".to_string()
}

fn default_database() -> String {
    "test".to_string()
}

fn default_bucket() -> String {
    "example".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
