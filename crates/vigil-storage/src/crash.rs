//! Native crash recovery
//!
//! An external crash handler leaves a `crash_log` marker in the granted crash
//! directory before the process dies. On the next start, the reader turns the
//! marker and the last context snapshots into one recovered event. The whole
//! crash directory is deleted on every start, marker or not, so a crash is
//! reported at most once and never picks up an earlier session's context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use vigil_core::{ContextSnapshot, CrashLog, NetworkInfo, UserInfo, ViewEvent};
use vigil_logging::{Level, SharedLogger, Target};

use crate::config::MissingViewPolicy;
use crate::datastore::SnapshotFileReaderWriter;
use crate::error::StorageError;
use crate::fs_ext;
use crate::queue::PersistenceQueue;

/// Name of the marker file written by the native crash handler
pub const CRASH_LOG_FILE_NAME: &str = "crash_log";

/// Event type of recovered native crashes
pub const NDK_CRASH_EVENT_TYPE: &str = "ndk_crash";

/// Provides the last view the user was on, if known
pub trait UiContextSupplier: Send + Sync {
    fn last_known_ui_context(&self) -> Option<Value>;
}

/// Receives the event synthesized from a crash marker
pub trait RecoveredEventSink: Send + Sync {
    fn emit_recovered_event(&self, crash: RecoveredCrash);
}

/// Crash event rebuilt from a marker and the last context snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredCrash {
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: String,
    pub signal: i32,
    pub signal_name: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_since_app_start_ms: Option<i64>,
    pub stacktrace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_info: Option<NetworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_view: Option<Value>,
}

impl RecoveredCrash {
    fn from_log(log: CrashLog) -> Self {
        Self {
            event_type: NDK_CRASH_EVENT_TYPE.to_string(),
            message: format!("NDK crash detected with signal: {}", log.signal_name),
            signal: log.signal,
            signal_name: log.signal_name,
            timestamp: log.timestamp,
            time_since_app_start_ms: log.time_since_app_start_ms,
            stacktrace: log.stacktrace,
            user_info: None,
            network_info: None,
            last_view: None,
        }
    }
}

/// UI context read back from the persisted `last_view_event` snapshot
pub struct PersistedUiContext {
    file: PathBuf,
    reader_writer: Arc<SnapshotFileReaderWriter>,
}

impl PersistedUiContext {
    pub fn new(crash_dir: &Path, reader_writer: Arc<SnapshotFileReaderWriter>) -> Self {
        Self {
            file: crash_dir.join(ViewEvent::FILE_NAME),
            reader_writer,
        }
    }
}

impl UiContextSupplier for PersistedUiContext {
    fn last_known_ui_context(&self) -> Option<Value> {
        self.reader_writer.read::<ViewEvent>(&self.file).map(|view| view.0)
    }
}

pub struct CrashRecoveryReader {
    crash_dir: PathBuf,
    reader_writer: Arc<SnapshotFileReaderWriter>,
    ui_context: Arc<dyn UiContextSupplier>,
    sink: Arc<dyn RecoveredEventSink>,
    policy: MissingViewPolicy,
    logger: SharedLogger,
}

impl CrashRecoveryReader {
    pub fn new(
        crash_dir: impl Into<PathBuf>,
        reader_writer: Arc<SnapshotFileReaderWriter>,
        ui_context: Arc<dyn UiContextSupplier>,
        sink: Arc<dyn RecoveredEventSink>,
        policy: MissingViewPolicy,
        logger: SharedLogger,
    ) -> Self {
        Self {
            crash_dir: crash_dir.into(),
            reader_writer,
            ui_context,
            sink,
            policy,
            logger,
        }
    }

    /// Queue the recovery; call before anything else is submitted
    pub fn schedule(self: Arc<Self>, queue: &PersistenceQueue) -> bool {
        queue.submit("crash recovery", move || {
            self.recover();
        })
    }

    /// Recover a pending crash, returning the emitted event
    ///
    /// The crash directory is deleted afterwards in every case, including
    /// when there was no marker or no event could be emitted.
    #[instrument(skip(self), fields(dir = %self.crash_dir.display()))]
    pub fn recover(&self) -> Option<RecoveredCrash> {
        let emitted = self.recover_marker();
        self.clear_crash_dir();
        emitted
    }

    fn recover_marker(&self) -> Option<RecoveredCrash> {
        let marker = self.crash_dir.join(CRASH_LOG_FILE_NAME);
        if !fs_ext::exists_safe(&marker, &self.logger) {
            debug!("No crash marker found");
            return None;
        }

        match self.read_crash(&marker) {
            Ok(crash) => self.dispatch(crash),
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!("Unable to read crash log: {}", marker.display()),
                    Some(&e),
                );
                None
            }
        }
    }

    fn clear_crash_dir(&self) {
        if !fs_ext::delete_safe(&self.crash_dir, &self.logger) {
            self.logger.log(
                Level::Error,
                &[Target::Maintainer, Target::Telemetry],
                &format!(
                    "Unable to clear crash directory {}; the crash may be reported again",
                    self.crash_dir.display()
                ),
                None,
            );
        }
    }

    fn read_crash(&self, marker: &Path) -> Result<RecoveredCrash, StorageError> {
        let bytes = fs_ext::read_bytes_safe(marker, &self.logger)
            .ok_or_else(|| StorageError::io(format!("unreadable marker {}", marker.display())))?;
        let log = CrashLog::from_json(&bytes)?;

        let mut crash = RecoveredCrash::from_log(log);
        crash.user_info = self
            .reader_writer
            .read::<UserInfo>(&self.crash_dir.join(UserInfo::FILE_NAME));
        crash.network_info = self
            .reader_writer
            .read::<NetworkInfo>(&self.crash_dir.join(NetworkInfo::FILE_NAME));
        crash.last_view = self.ui_context.last_known_ui_context();
        Ok(crash)
    }

    fn dispatch(&self, crash: RecoveredCrash) -> Option<RecoveredCrash> {
        if crash.last_view.is_none() && self.policy == MissingViewPolicy::Drop {
            let err = StorageError::RecoveryAmbiguity(format!(
                "crash with signal {} has no view to attach to",
                crash.signal_name
            ));
            self.logger.log(
                Level::Debug,
                &[Target::Maintainer],
                "Dropping recovered crash without UI context",
                Some(&err),
            );
            return None;
        }

        debug!(signal = %crash.signal_name, "Emitting recovered crash");
        self.sink.emit_recovered_event(crash.clone());
        Some(crash)
    }
}
