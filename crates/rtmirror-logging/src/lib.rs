//! Structured logging for rtmirror
//!
//! Sets up a global `tracing` subscriber from a [`LogConfig`]:
//!
//! - **JSONL Output**: one JSON object per event on the console (default)
//! - **Pretty Output**: human-readable console output for development
//! - **File Output**: JSONL to a daily/hourly rotated or single file
//!
//! `RUST_LOG` takes precedence over the configured default level.
//!
//! # Quick Start
//!
//! ```ignore
//! use rtmirror_logging::{LogConfig, MirrorSubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = MirrorSubscriberBuilder::new().init();
//!
//! // Pretty console output
//! let _guard = MirrorSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! Keep the returned guard alive for the whole program: dropping it flushes
//! and stops the background file writer.

pub mod config;

pub use config::{
    ConsoleConfig, ConsoleTarget, FileConfig, JsonlConfig, LogConfig, RotationStrategy,
};
pub use tracing_appender::non_blocking::WorkerGuard;

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// The level / filter directive does not parse
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// The log directory or file cannot be created
    #[error("Log file error: {0}")]
    File(String),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    Init(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use
/// [`LogConfig::development()`] for human-readable output.
#[derive(Debug, Clone, Default)]
pub struct MirrorSubscriberBuilder {
    config: LogConfig,
}

impl MirrorSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Send console output to stdout or stderr
    pub fn with_console_target(mut self, target: ConsoleTarget) -> Self {
        self.config.console.target = target;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Configuration the subscriber will be built from
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally.
    ///
    /// Returns the file writer guard when file output is enabled.
    ///
    /// # Errors
    ///
    /// Fails if the filter does not parse, the log file cannot be opened,
    /// or a global subscriber is already set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.config.default_level))
            .map_err(|e| LogError::Filter(e.to_string()))?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(console_layer(&self.config.console, &self.config.jsonl));
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(json_layer(&self.config.jsonl, writer));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }
}

fn console_layer(console: &ConsoleConfig, jsonl: &JsonlConfig) -> BoxedLayer {
    match (console.pretty, console.target) {
        (true, ConsoleTarget::Stdout) => text_layer(console.ansi, std::io::stdout),
        (true, ConsoleTarget::Stderr) => text_layer(console.ansi, std::io::stderr),
        (false, ConsoleTarget::Stdout) => json_layer(jsonl, std::io::stdout),
        (false, ConsoleTarget::Stderr) => json_layer(jsonl, std::io::stderr),
    }
}

fn text_layer<W>(ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

fn json_layer<W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_writer(writer)
        .boxed()
}

/// Non-blocking writer for the configured file; `Never` writes a single
/// `<prefix>.log`, the others add the period to the name.
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    std::fs::create_dir_all(&config.directory).map_err(|e| LogError::File(e.to_string()))?;

    let rotation = match config.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .map_err(|e| LogError::File(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}
