//! Data migration between consent areas

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;
use vigil_core::ConsentState;
use vigil_logging::{Level, SharedLogger, Target};

use crate::fs_ext;
use crate::orchestrator::FileOrchestrator;

const MAX_MOVE_ATTEMPTS: u32 = 3;
const MOVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What happens to already collected data on a consent transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Keep everything where it is
    NoOp,
    /// Delete a whole directory
    WipeData { dir: PathBuf },
    /// Move every file of a directory into another, oldest first
    MoveData { from: PathBuf, to: PathBuf },
}

impl MigrationOperation {
    pub fn run(&self, logger: &SharedLogger) -> bool {
        match self {
            MigrationOperation::NoOp => true,
            MigrationOperation::WipeData { dir } => {
                debug!(dir = %dir.display(), "Wiping data");
                fs_ext::delete_safe(dir, logger)
            }
            MigrationOperation::MoveData { from, to } => {
                debug!(from = %from.display(), to = %to.display(), "Moving data");
                for attempt in 1..=MAX_MOVE_ATTEMPTS {
                    if fs_ext::move_files_safe(from, to, logger) {
                        return true;
                    }
                    if attempt < MAX_MOVE_ATTEMPTS {
                        thread::sleep(MOVE_RETRY_DELAY);
                    }
                }
                logger.log(
                    Level::Error,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!(
                        "Unable to move data from {} to {} after {MAX_MOVE_ATTEMPTS} attempts",
                        from.display(),
                        to.display()
                    ),
                    None,
                );
                false
            }
        }
    }
}

/// Resolves and runs the migration for a consent transition
pub struct DataMigrator {
    logger: SharedLogger,
}

impl DataMigrator {
    pub fn new(logger: SharedLogger) -> Self {
        Self { logger }
    }

    /// Pick the operation for a transition
    ///
    /// | previous               | current     | operation         |
    /// |------------------------|-------------|-------------------|
    /// | none                   | any         | wipe pending      |
    /// | granted or not granted | pending     | wipe pending      |
    /// | pending                | granted     | pending → granted |
    /// | pending                | not granted | wipe pending      |
    /// | anything else          |             | no-op             |
    ///
    /// Pending data left by an earlier process is never carried into a new
    /// session.
    pub fn resolve(
        &self,
        previous: Option<ConsentState>,
        current: ConsentState,
        pending: &FileOrchestrator,
        granted: &FileOrchestrator,
    ) -> MigrationOperation {
        use ConsentState::*;

        let wipe_pending = || match pending.get_root_dir() {
            Some(dir) => MigrationOperation::WipeData { dir },
            None => MigrationOperation::NoOp,
        };

        match (previous, current) {
            (None, _) => wipe_pending(),
            (Some(Granted) | Some(NotGranted), Pending) => wipe_pending(),
            (Some(Pending), Granted) => match (pending.get_root_dir(), granted.get_root_dir()) {
                (Some(from), Some(to)) => MigrationOperation::MoveData { from, to },
                _ => MigrationOperation::NoOp,
            },
            (Some(Pending), NotGranted) => wipe_pending(),
            _ => MigrationOperation::NoOp,
        }
    }

    /// Resolve and run the migration; returns false if it failed
    pub fn migrate(
        &self,
        previous: Option<ConsentState>,
        current: ConsentState,
        pending: &FileOrchestrator,
        granted: &FileOrchestrator,
    ) -> bool {
        let operation = self.resolve(previous, current, pending, granted);
        debug!(?previous, %current, ?operation, "Consent migration");
        operation.run(&self.logger)
    }
}
