//! Structured logging for the livelink view engine
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for log aggregation (default)
//! - **View Context**: the id of the view being handled is attached to spans
//! - **File Rotation**: daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use livelink_logging::{LiveSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = LiveSubscriberBuilder::new().init();
//!
//! // Pretty human-readable output, failing if a subscriber is installed
//! let _guard = LiveSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{ViewContextData, ViewContextGuard};
pub use layers::ViewContextLayer;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use
/// [`LogConfig::development()`] for pretty output during development.
pub struct LiveSubscriberBuilder {
    config: LogConfig,
}

impl LiveSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
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

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber globally
    ///
    /// The returned guard must be kept alive for file output to flush.
    /// Failures are reported on stderr and leave logging as it was.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {}", e);
                None
            }
        }
    }

    /// Install the subscriber globally, returning an error if one is
    /// already installed or the log file cannot be opened
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let (layers, guard) = self.layers()?;
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        Registry::default()
            .with(env_filter)
            .with(layers)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;
        Ok(guard)
    }

    fn layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let jsonl = &self.config.jsonl;
        let mut layers: Vec<BoxedLayer> = vec![ViewContextLayer::new().boxed()];
        let mut guard = None;

        if self.config.console.enabled {
            let console: BoxedLayer = if self.config.console.pretty {
                tracing_subscriber::fmt::layer()
                    .with_ansi(self.config.console.ansi)
                    .with_target(true)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(jsonl.include_spans)
                    .flatten_event(jsonl.flatten_events)
                    .with_file(jsonl.include_location)
                    .with_line_number(jsonl.include_location)
                    .boxed()
            };
            layers.push(console);
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(jsonl.include_spans)
                    .flatten_event(jsonl.flatten_events)
                    .with_file(jsonl.include_location)
                    .with_line_number(jsonl.include_location)
                    .with_writer(writer)
                    .boxed(),
            );
        }

        Ok((layers, guard))
    }
}

impl Default for LiveSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a single file for `Never`, appends to rolling files otherwise
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let writer = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(writer)
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    let _ = LiveSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .try_init();
}

/// Initialize logging for testing (minimal output)
pub fn init_testing() {
    let _ = LiveSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = LiveSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = LiveSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
    }

    #[test]
    fn test_layers_follow_config() {
        let (layers, guard) = LiveSubscriberBuilder::new().layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert!(guard.is_none());

        let (layers, _) = LiveSubscriberBuilder::new().with_console(false).layers().unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn test_file_output_creates_directory() {
        let dir = std::env::temp_dir().join(format!("livelink-log-{}", uuid::Uuid::new_v4()));
        let builder = LiveSubscriberBuilder::new().with_console(false).with_file_output(FileConfig {
            directory: dir.clone(),
            prefix: "test".to_string(),
            rotation: RotationStrategy::Never,
        });
        let (layers, guard) = builder.layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert!(guard.is_some());
        assert!(dir.join("test.log").exists());
        drop(guard);
        let _ = fs::remove_dir_all(dir);
    }
}
