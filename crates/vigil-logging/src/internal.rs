//! Internal SDK logger
//!
//! Messages emitted by the SDK itself carry a severity and one or more
//! audiences: the host application developer ([`Target::User`]), the SDK
//! maintainers ([`Target::Maintainer`]) and the SDK's own health telemetry
//! ([`Target::Telemetry`]).
//!
//! Components receive an [`InternalLogger`] explicitly at construction.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity of an internal log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Verbose => "verbose",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(name)
    }
}

/// Audience of an internal log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    User,
    Maintainer,
    Telemetry,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Target::User => "user",
            Target::Maintainer => "maintainer",
            Target::Telemetry => "telemetry",
        };
        f.write_str(name)
    }
}

/// Comma separated rendering of a target list
struct Targets<'a>(&'a [Target]);

impl fmt::Display for Targets<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, target) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{target}")?;
        }
        Ok(())
    }
}

/// Sink for messages emitted by the SDK about itself
pub trait InternalLogger: Send + Sync {
    /// Log a message for the given audiences
    fn log(
        &self,
        level: Level,
        targets: &[Target],
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
    );

    /// Log a debug message
    fn debug(&self, targets: &[Target], message: &str) {
        self.log(Level::Debug, targets, message, None);
    }

    /// Log an info message
    fn info(&self, targets: &[Target], message: &str) {
        self.log(Level::Info, targets, message, None);
    }

    /// Log a warning
    fn warn(&self, targets: &[Target], message: &str) {
        self.log(Level::Warn, targets, message, None);
    }

    /// Log an error with its cause
    fn error(&self, targets: &[Target], message: &str, error: &(dyn StdError + 'static)) {
        self.log(Level::Error, targets, message, Some(error));
    }
}

/// Shared handle to an internal logger
pub type SharedLogger = Arc<dyn InternalLogger>;

/// Logger forwarding every message to `tracing`
///
/// The audiences are recorded in a `targets` field, the cause (if any) in an
/// `error` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    /// Create a shared tracing logger
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl InternalLogger for TracingLogger {
    fn log(
        &self,
        level: Level,
        targets: &[Target],
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
    ) {
        let targets = Targets(targets);
        let error = error.map(|e| e.to_string());
        let error = error.as_deref();
        match level {
            Level::Verbose => tracing::trace!(targets = %targets, error, "{message}"),
            Level::Debug => tracing::debug!(targets = %targets, error, "{message}"),
            Level::Info => tracing::info!(targets = %targets, error, "{message}"),
            Level::Warn => tracing::warn!(targets = %targets, error, "{message}"),
            Level::Error => tracing::error!(targets = %targets, error, "{message}"),
        }
    }
}

/// A captured log message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub targets: Vec<Target>,
    pub message: String,
    pub error: Option<String>,
}

impl LogRecord {
    /// Whether the record is addressed to `target`
    pub fn is_for(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }
}

/// Logger keeping every message in memory
///
/// Messages are also forwarded to `tracing` so test output stays readable.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Create an empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured records
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records at the given level
    pub fn records_at(&self, level: Level) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Whether any record at `level` contains `needle` in its message
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    /// Number of captured records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop all captured records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl InternalLogger for MemoryLogger {
    fn log(
        &self,
        level: Level,
        targets: &[Target],
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
    ) {
        TracingLogger.log(level, targets, message, error);
        self.records.lock().push(LogRecord {
            timestamp: Utc::now(),
            level,
            targets: targets.to_vec(),
            message: message.to_string(),
            error: error.map(|e| e.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_memory_logger_captures_records() {
        let logger = MemoryLogger::new();
        logger.warn(&[Target::User], "directory missing");
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        logger.error(&[Target::Maintainer, Target::Telemetry], "write failed", &err);

        assert_eq!(logger.len(), 2);
        assert!(logger.contains(Level::Warn, "missing"));

        let errors = logger.records_at(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_for(Target::Telemetry));
        assert!(!errors[0].is_for(Target::User));
        assert_eq!(errors[0].error.as_deref(), Some("denied"));

        logger.clear();
        assert!(logger.is_empty());
    }

    #[test]
    fn test_targets_display() {
        let rendered = Targets(&[Target::Maintainer, Target::Telemetry]).to_string();
        assert_eq!(rendered, "maintainer,telemetry");
        assert_eq!(Targets(&[]).to_string(), "");
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Verbose < Level::Debug);
        assert!(Level::Warn < Level::Error);
        assert_eq!(Level::Warn.to_string(), "warn");
    }

    #[test]
    fn test_tracing_logger_does_not_panic_without_subscriber() {
        let logger = TracingLogger::shared();
        logger.info(&[Target::User], "no subscriber installed");
        logger.log(Level::Verbose, &[], "empty targets", None);
    }
}
