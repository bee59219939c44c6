//! Persistence core
//!
//! Owns the consent provider, the persistence queue, one storage per feature
//! and the context snapshot store. Consent changes fan out to every storage
//! through the queue, so each write lands where the consent at call time says.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, instrument};
use vigil_core::{Clock, ConsentProvider, ConsentState, SystemClock};
use vigil_logging::{Level, SharedLogger, Target, TracingLogger};

use crate::config::StorageConfig;
use crate::crash::{
    CrashRecoveryReader, PersistedUiContext, RecoveredCrash, RecoveredEventSink, UiContextSupplier,
};
use crate::datastore::{ContextSnapshotStore, SnapshotFileReaderWriter};
use crate::error::StorageError;
use crate::queue::PersistenceQueue;
use crate::storage::ConsentAwareStorage;

const QUEUE_NAME: &str = "persistence";

/// Sink used when the host doesn't register one
struct UnhandledCrashSink {
    logger: SharedLogger,
}

impl RecoveredEventSink for UnhandledCrashSink {
    fn emit_recovered_event(&self, crash: RecoveredCrash) {
        self.logger.log(
            Level::Warn,
            &[Target::User],
            &format!(
                "A native crash ({}) was recovered but no sink is registered to receive it",
                crash.signal_name
            ),
            None,
        );
    }
}

/// Builder for [`PersistenceCore`]
pub struct PersistenceCoreBuilder {
    config: StorageConfig,
    clock: Option<Arc<dyn Clock>>,
    logger: Option<SharedLogger>,
    initial_consent: ConsentState,
    ui_context: Option<Arc<dyn UiContextSupplier>>,
    sink: Option<Arc<dyn RecoveredEventSink>>,
}

impl PersistenceCoreBuilder {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            clock: None,
            logger: None,
            initial_consent: ConsentState::default(),
            ui_context: None,
            sink: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_initial_consent(mut self, consent: ConsentState) -> Self {
        self.initial_consent = consent;
        self
    }

    /// Source of the last view for crash recovery
    ///
    /// Defaults to the persisted `last_view_event` snapshot.
    pub fn with_ui_context_supplier(mut self, supplier: Arc<dyn UiContextSupplier>) -> Self {
        self.ui_context = Some(supplier);
        self
    }

    pub fn with_recovered_event_sink(mut self, sink: Arc<dyn RecoveredEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start the queue, schedule crash recovery and open the snapshot store
    ///
    /// Must be called within a tokio runtime.
    #[instrument(skip(self), fields(root = %self.config.root_dir.display()))]
    pub fn start(self) -> Result<PersistenceCore, StorageError> {
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let logger = self.logger.unwrap_or_else(TracingLogger::shared);
        let queue = PersistenceQueue::start(QUEUE_NAME, logger.clone())?;

        // Recovery must run before any snapshot gate touches the crash directory
        let crash_dir = self.config.crash_dir();
        let reader_writer = Arc::new(SnapshotFileReaderWriter::new(
            &self.config,
            clock.clone(),
            logger.clone(),
        ));
        let ui_context: Arc<dyn UiContextSupplier> = match self.ui_context {
            Some(ui_context) => ui_context,
            None => Arc::new(PersistedUiContext::new(&crash_dir, reader_writer.clone())),
        };
        let sink: Arc<dyn RecoveredEventSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(UnhandledCrashSink {
                logger: logger.clone(),
            }),
        };
        Arc::new(CrashRecoveryReader::new(
            crash_dir,
            reader_writer,
            ui_context,
            sink,
            self.config.missing_view_policy,
            logger.clone(),
        ))
        .schedule(&queue);

        let snapshots = ContextSnapshotStore::new(
            &self.config,
            queue.clone(),
            clock.clone(),
            logger.clone(),
            self.initial_consent,
        );

        info!(consent = %self.initial_consent, "Persistence core started");
        Ok(PersistenceCore {
            consent: ConsentProvider::new(self.initial_consent),
            consent_lock: Mutex::new(()),
            storages: DashMap::new(),
            config: self.config,
            clock,
            logger,
            queue,
            snapshots,
        })
    }
}

pub struct PersistenceCore {
    config: StorageConfig,
    clock: Arc<dyn Clock>,
    logger: SharedLogger,
    consent: ConsentProvider,
    consent_lock: Mutex<()>,
    queue: PersistenceQueue,
    storages: DashMap<String, Arc<ConsentAwareStorage>>,
    snapshots: ContextSnapshotStore,
}

impl PersistenceCore {
    pub fn builder(config: StorageConfig) -> PersistenceCoreBuilder {
        PersistenceCoreBuilder::new(config)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Storage for `feature`, created on first registration
    pub fn register_feature(&self, feature: &str) -> Arc<ConsentAwareStorage> {
        let _consent = self.consent_lock.lock();
        self.storages
            .entry(feature.to_string())
            .or_insert_with(|| {
                ConsentAwareStorage::new(
                    feature,
                    &self.config,
                    self.queue.clone(),
                    self.clock.clone(),
                    self.logger.clone(),
                    self.consent.current(),
                )
            })
            .clone()
    }

    pub fn storage(&self, feature: &str) -> Option<Arc<ConsentAwareStorage>> {
        self.storages.get(feature).map(|s| s.clone())
    }

    pub fn features(&self) -> Vec<String> {
        self.storages.iter().map(|e| e.key().clone()).collect()
    }

    pub fn consent(&self) -> ConsentState {
        self.consent.current()
    }

    /// Change the tracking consent and migrate collected data accordingly
    #[instrument(skip(self))]
    pub fn set_tracking_consent(&self, consent: ConsentState) {
        let _consent = self.consent_lock.lock();
        let Some(transition) = self.consent.update(consent) else {
            return;
        };
        for storage in self.storages.iter() {
            storage.on_consent_changed(transition);
        }
        self.snapshots.on_consent_changed(transition);
        info!(previous = ?transition.previous, current = %transition.current, "Tracking consent changed");
    }

    pub fn snapshots(&self) -> &ContextSnapshotStore {
        &self.snapshots
    }

    pub fn update_last_view_event(&self, view: Value) -> bool {
        self.snapshots.update_last_view_event(view)
    }

    /// Queue the deletion of every batch of every feature
    pub fn clear_all_data(&self) {
        for storage in self.storages.iter() {
            storage.drop_all();
        }
    }

    /// Wait for every task queued so far
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.queue.flush().await
    }

    /// Drain the queue and stop; returns false if the timeout was hit
    pub async fn shutdown(&self) -> bool {
        self.queue.shutdown(self.config.shutdown_timeout()).await
    }
}
