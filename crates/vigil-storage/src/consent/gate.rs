//! Consent-aware file orchestrator
//!
//! Routes writes to the pending area, the granted area or nowhere, depending
//! on the tracking consent. Reads only ever see the granted area. Consent
//! changes are applied on the persistence queue, after every write that was
//! submitted before them, so a write is always routed by the consent that was
//! current when it was made.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use vigil_core::{ConsentState, ConsentTransition};
use vigil_logging::SharedLogger;

use super::migrator::DataMigrator;
use crate::orchestrator::FileOrchestrator;
use crate::queue::PersistenceQueue;

pub struct ConsentAwareFileOrchestrator {
    pending: FileOrchestrator,
    granted: FileOrchestrator,
    noop: FileOrchestrator,
    migrator: DataMigrator,
    queue: PersistenceQueue,
    current: Mutex<ConsentState>,
}

impl ConsentAwareFileOrchestrator {
    /// Build the gate and queue the initial migration (none → `initial_consent`)
    pub fn new(
        pending: FileOrchestrator,
        granted: FileOrchestrator,
        queue: PersistenceQueue,
        initial_consent: ConsentState,
        logger: SharedLogger,
    ) -> Arc<Self> {
        let gate = Arc::new(Self {
            pending,
            granted,
            noop: FileOrchestrator::NoOp,
            migrator: DataMigrator::new(logger),
            queue,
            current: Mutex::new(initial_consent),
        });
        gate.on_consent_changed(ConsentTransition::initial(initial_consent));
        gate
    }

    /// Consent as seen by the persistence queue
    pub fn current_consent(&self) -> ConsentState {
        *self.current.lock()
    }

    /// Queue the migration for a consent transition
    pub fn on_consent_changed(self: &Arc<Self>, transition: ConsentTransition) {
        let gate = self.clone();
        self.queue.submit("consent migration", move || {
            gate.migrator.migrate(
                transition.previous,
                transition.current,
                &gate.pending,
                &gate.granted,
            );
            *gate.current.lock() = transition.current;
            debug!(consent = %transition.current, "Consent applied");
        });
    }

    fn delegate(&self) -> &FileOrchestrator {
        match self.current_consent() {
            ConsentState::Pending => &self.pending,
            ConsentState::Granted => &self.granted,
            ConsentState::NotGranted => &self.noop,
        }
    }

    pub fn get_writable_file(&self, force_new: bool) -> Option<PathBuf> {
        self.delegate().get_writable_file(force_new)
    }

    pub fn get_metadata_file(&self, file: &Path) -> Option<PathBuf> {
        self.delegate().get_metadata_file(file)
    }

    pub fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        self.granted.get_readable_file(exclude)
    }

    pub fn get_all_files(&self) -> Vec<PathBuf> {
        self.granted.get_all_files()
    }

    pub fn get_flushable_files(&self) -> Vec<PathBuf> {
        self.granted.get_flushable_files()
    }

    pub fn get_root_dir(&self) -> Option<PathBuf> {
        self.granted.get_root_dir()
    }

    /// Files of both the pending and the granted area
    pub fn get_every_file(&self) -> Vec<PathBuf> {
        let mut files = self.pending.get_all_files();
        files.extend(self.granted.get_all_files());
        files
    }

    pub fn pending(&self) -> &FileOrchestrator {
        &self.pending
    }

    pub fn granted(&self) -> &FileOrchestrator {
        &self.granted
    }
}
