//! `[logging]` section of the mirror configuration
//!
//! Every field has a default, so an empty section (or none at all) gives
//! JSONL events on stdout at `info`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where and how replication and API events are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `rtmirror_sync=debug,info`
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Extra JSONL copy of every event on disk
    pub file: Option<FileConfig>,
    /// Shape of JSONL events (console and file alike)
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// Running the mirror by hand: readable colored lines at `debug`
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                pretty: true,
                ansi: true,
                ..ConsoleConfig::default()
            },
            ..Self::default()
        }
    }

    /// `serve` under a supervisor: console off, JSONL into daily files
    /// under `log_dir`
    pub fn service(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            console: ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig {
                directory: log_dir.into(),
                ..FileConfig::default()
            }),
            ..Self::default()
        }
    }

    /// Warnings and errors only
    pub fn quiet() -> Self {
        Self {
            default_level: "warn".to_string(),
            ..Self::default()
        }
    }
}

/// Console stream events go to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    /// Keeps stdout free for command output (`backfill`, `verify`)
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSONL
    pub pretty: bool,
    /// Colors, only honored with `pretty`
    pub ansi: bool,
    pub target: ConsoleTarget,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
            target: ConsoleTarget::Stdout,
        }
    }
}

/// On-disk event log, separate from the record log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Created on startup if missing
    pub directory: PathBuf,
    /// File name stem: `<prefix>.<period>.log`, or `<prefix>.log` with
    /// [`RotationStrategy::Never`]
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "rtmirror".to_string(),
            rotation: RotationStrategy::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// JSONL event shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Put event fields (`cursor`, `batches`, ...) at the top level rather
    /// than under `fields`
    pub flatten_events: bool,
    /// Attach the enclosing spans, e.g. the `append{id=..}` span
    pub include_spans: bool,
    /// Attach source file and line
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: true,
        }
    }
}
