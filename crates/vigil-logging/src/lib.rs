//! Logging for the Vigil SDK
//!
//! # Features
//!
//! - **Internal Logger**: [`InternalLogger`] with severity and audience tags,
//!   routed into `tracing`
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use vigil_logging::{LogConfig, VigilSubscriberBuilder};
//!
//! // Simple setup with defaults (JSONL to console)
//! VigilSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! VigilSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Internal Logger
//!
//! ```ignore
//! use vigil_logging::{InternalLogger, Target, TracingLogger};
//!
//! let logger = TracingLogger::shared();
//! logger.warn(&[Target::Maintainer, Target::Telemetry], "Batch file locked");
//! ```

pub mod config;
pub mod internal;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use internal::{
    InternalLogger, Level, LogRecord, MemoryLogger, SharedLogger, Target, TracingLogger,
};

use std::fs::{self, File};
use std::io;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log output: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to create rolling appender: {0}")]
    Appender(#[from] InitError),

    #[error("Invalid filter directives: {0}")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Builder for configuring and initializing the Vigil logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
pub struct VigilSubscriberBuilder {
    config: LogConfig,
}

impl VigilSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    ///
    /// Default: JSONL output to console
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

    /// Initialize the subscriber globally
    ///
    /// Returns a guard that must be kept alive for the duration of the program
    /// when file output is enabled. Failures are reported on stderr.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {}", e);
                None
            }
        }
    }

    /// Try to initialize the subscriber globally
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directives())
                .map_err(|e| LoggingError::Filter(e.to_string()))?,
        };

        let console = &self.config.console;
        let pretty_console = (console.enabled && console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
        });
        let jsonl_console = (console.enabled && !console.pretty)
            .then(|| layers::jsonl_layer(io::stdout, &self.config.jsonl));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = create_file_writer(file_config)?;
                (
                    Some(layers::jsonl_layer(writer, &self.config.jsonl)),
                    Some(guard),
                )
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(pretty_console)
            .with(jsonl_console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }
}

impl Default for VigilSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the non-blocking file writer; truncates for `Never`, appends otherwise
fn create_file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str());
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() {
    VigilSubscriberBuilder::new().init();
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    VigilSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output)
pub fn init_testing() {
    let _ = VigilSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
