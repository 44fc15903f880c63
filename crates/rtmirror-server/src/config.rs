//! Process configuration
//!
//! Loaded from a TOML file where every field is optional, then adjusted
//! by environment variables:
//!
//! - `PORT` overrides `server.port`
//! - `FIREBASE_DATABASE_URL` overrides `source.database_url`
//!
//! ```toml
//! [server]
//! port = 3003
//! static_dir = "public"
//!
//! [source]
//! database_url = "https://my-db-default-rtdb.firebaseio.com"
//! path = "Sensores"
//!
//! [sync]
//! batch_size = 300
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use rtmirror_core::RecordSchema;
use rtmirror_logging::LogConfig;
use rtmirror_storage::AppendLogConfig;
use rtmirror_sync::SyncConfig;
use rtmirror_transport::FirebaseConfig;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "rtmirror.toml";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file cannot be read
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
    /// Directory served for paths no route matches
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3003,
            cors_origins: vec![
                "http://localhost:5500".to_string(),
                "http://127.0.0.1:5500".to_string(),
                "http://localhost:3003".to_string(),
            ],
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where replicated state lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON-lines record log
    pub log_path: PathBuf,
    /// Plain-text cursor file
    pub cursor_path: PathBuf,
    /// Sync every append to disk
    pub sync_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("sensores-cache.jsonl"),
            cursor_path: PathBuf::from("sensores-last-key.txt"),
            sync_on_write: true,
        }
    }
}

impl StorageConfig {
    /// Settings for the append log
    pub fn append_log(&self) -> AppendLogConfig {
        AppendLogConfig {
            path: self.log_path.clone(),
            sync_on_write: self.sync_on_write,
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub source: FirebaseConfig,
    pub schema: RecordSchema,
    pub sync: SyncConfig,
    pub logging: LogConfig,
}

impl MirrorConfig {
    /// Load configuration and apply environment overrides.
    ///
    /// With an explicit `path` the file must exist. Without one,
    /// [`DEFAULT_CONFIG_FILE`] is used if present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PORT` and `FIREBASE_DATABASE_URL` as returned by `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("FIREBASE_DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            self.source.database_url = url;
        }
    }

    /// Reject settings the replication engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid("sync.batch_size must be at least 1".into()));
        }
        if self.sync.max_batches == 0 {
            return Err(ConfigError::Invalid("sync.max_batches must be at least 1".into()));
        }
        if self.sync.dedup_target > self.sync.dedup_ceiling {
            return Err(ConfigError::Invalid(
                "sync.dedup_target must not exceed sync.dedup_ceiling".into(),
            ));
        }
        if self.schema.timestamp_field.is_empty() || self.schema.payload_field.is_empty() {
            return Err(ConfigError::Invalid("schema field names must not be empty".into()));
        }
        Ok(())
    }
}
