//! Consent-aware batch storage for one feature
//!
//! Producers call [`ConsentAwareStorage::write`] and return immediately; the
//! write runs on the persistence queue and lands in the pending or granted
//! area depending on consent. The upload pipeline pulls granted batches with
//! [`ConsentAwareStorage::read_next_batch`] and releases them with
//! [`ConsentAwareStorage::confirm_batch_read`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};
use vigil_core::{Clock, ConsentState, ConsentTransition, RawBatchEvent, RemovalReason};
use vigil_logging::{Level, SharedLogger, Target};

use crate::batch::{self, BatchFileReaderWriter, BatchLocks};
use crate::config::StorageConfig;
use crate::consent::ConsentAwareFileOrchestrator;
use crate::error::StorageError;
use crate::fs_ext;
use crate::orchestrator::{BatchFileOrchestrator, FileOrchestrator};
use crate::queue::PersistenceQueue;
use crate::tlv::{HEADER_SIZE, TlvCodec};

/// Identifier of a batch handed to the upload pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    pub fn from_file(file: &Path) -> Self {
        Self(
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, file: &Path) -> bool {
        file.file_name().is_some_and(|n| n.to_string_lossy() == self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A batch locked for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchData {
    pub id: BatchId,
    pub events: Vec<RawBatchEvent>,
    pub metadata: Option<Vec<u8>>,
}

/// Access to the batch currently receiving writes, inside a write task
pub struct BatchWriteContext<'a> {
    storage: &'a ConsentAwareStorage,
    file: Option<PathBuf>,
    metadata_file: Option<PathBuf>,
}

impl BatchWriteContext<'_> {
    /// Metadata currently stored alongside the batch
    pub fn current_metadata(&self) -> Option<Vec<u8>> {
        let metadata_file = self.metadata_file.as_deref()?;
        self.storage.reader_writer.read_metadata(metadata_file)
    }

    /// Append an event to the batch, replacing the batch metadata if given
    ///
    /// Returns false when the event was dropped (no consent, too large, I/O).
    pub fn write(&mut self, event: &RawBatchEvent, batch_metadata: Option<&[u8]>) -> bool {
        let Some(file) = self.file.as_deref() else {
            return false;
        };
        if !self.storage.accepts(event) {
            return false;
        }
        if !self.storage.reader_writer.write_event(file, event, true) {
            return false;
        }
        match (batch_metadata, self.metadata_file.as_deref()) {
            (Some(metadata), Some(metadata_file)) => {
                self.storage.reader_writer.write_metadata(metadata_file, metadata)
            }
            _ => true,
        }
    }
}

pub struct ConsentAwareStorage {
    feature: String,
    gate: Arc<ConsentAwareFileOrchestrator>,
    reader_writer: BatchFileReaderWriter,
    locks: Arc<BatchLocks>,
    queue: PersistenceQueue,
    max_item_size: u64,
    logger: SharedLogger,
}

impl ConsentAwareStorage {
    /// Storage for `feature` under `{root}/{feature}_v{N}[_intermediary]`
    pub fn new(
        feature: impl Into<String>,
        config: &StorageConfig,
        queue: PersistenceQueue,
        clock: Arc<dyn Clock>,
        logger: SharedLogger,
        initial_consent: ConsentState,
    ) -> Arc<Self> {
        let feature = feature.into();
        let locks = Arc::new(BatchLocks::new());
        let persistence = config.persistence.clone();

        let pending = FileOrchestrator::Batch(BatchFileOrchestrator::new(
            config.pending_dir(&feature),
            persistence.clone(),
            clock.clone(),
            logger.clone(),
            locks.clone(),
        ));
        let granted = FileOrchestrator::Batch(BatchFileOrchestrator::new(
            config.granted_dir(&feature),
            persistence.clone(),
            clock,
            logger.clone(),
            locks.clone(),
        ));
        let gate = ConsentAwareFileOrchestrator::new(
            pending,
            granted,
            queue.clone(),
            initial_consent,
            logger.clone(),
        );

        let codec = TlvCodec::new(persistence.max_item_size as usize + HEADER_SIZE, logger.clone());
        Arc::new(Self {
            feature,
            gate,
            reader_writer: BatchFileReaderWriter::new(codec, logger.clone()),
            locks,
            queue,
            max_item_size: persistence.max_item_size,
            logger,
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Queue an event write; returns false if the queue rejected it
    pub fn write(self: &Arc<Self>, event: RawBatchEvent, batch_metadata: Option<Vec<u8>>) -> bool {
        self.write_current_batch(false, move |batch| {
            batch.write(&event, batch_metadata.as_deref());
        })
    }

    /// Run `callback` on the persistence queue against the current batch
    ///
    /// `force_new` closes the current batch first. The batch stays open for
    /// writing (invisible to uploads) while the callback runs.
    pub fn write_current_batch<F>(self: &Arc<Self>, force_new: bool, callback: F) -> bool
    where
        F: FnOnce(&mut BatchWriteContext<'_>) + Send + 'static,
    {
        let storage = self.clone();
        self.queue.submit("batch write", move || {
            storage.run_batch_write(force_new, callback);
        })
    }

    fn run_batch_write<F>(&self, force_new: bool, callback: F)
    where
        F: FnOnce(&mut BatchWriteContext<'_>),
    {
        let file = self.open_writable_file(force_new);
        let metadata_file = file
            .as_deref()
            .and_then(|file| self.gate.get_metadata_file(file));

        let mut context = BatchWriteContext {
            storage: self,
            file: file.clone(),
            metadata_file,
        };
        callback(&mut context);

        if let Some(file) = file {
            self.locks.close_for_write(&file);
        }
    }

    fn open_writable_file(&self, force_new: bool) -> Option<PathBuf> {
        let file = self.gate.get_writable_file(force_new)?;
        if self.locks.open_for_write(&file) {
            return Some(file);
        }
        // Locked for upload in the meantime
        let file = self.gate.get_writable_file(true)?;
        self.locks.open_for_write(&file).then_some(file)
    }

    fn accepts(&self, event: &RawBatchEvent) -> bool {
        let size = event.data.len() as u64;
        if size <= self.max_item_size {
            return true;
        }
        let err = StorageError::CapacityExceeded {
            size,
            max: self.max_item_size,
        };
        self.logger.log(
            Level::Error,
            &[Target::User, Target::Telemetry],
            &format!(
                "Can't write data with size {size} (max item size is {})",
                self.max_item_size
            ),
            Some(&err),
        );
        false
    }

    /// Lock the oldest readable granted batch and return its content
    #[instrument(skip(self), fields(feature = %self.feature))]
    pub fn read_next_batch(&self) -> Option<BatchData> {
        let file = self.gate.get_readable_file(&self.locks.unreadable())?;
        if !self.locks.lock_for_read(&file) {
            return None;
        }

        let events = self.reader_writer.read_events(&file);
        let metadata = self
            .gate
            .granted()
            .get_metadata_file(&file)
            .and_then(|metadata_file| self.reader_writer.read_metadata(&metadata_file));

        debug!(file = %file.display(), events = events.len(), "Batch locked for upload");
        Some(BatchData {
            id: BatchId::from_file(&file),
            events,
            metadata,
        })
    }

    /// Release a batch returned by [`read_next_batch`](Self::read_next_batch)
    ///
    /// The batch and its metadata are deleted when `delete` is true; the
    /// read lock is released either way.
    #[instrument(skip(self), fields(feature = %self.feature))]
    pub fn confirm_batch_read(&self, id: &BatchId, reason: RemovalReason, delete: bool) {
        let Some(file) = self.locks.read_locked().into_iter().find(|f| id.matches(f)) else {
            debug!(%id, "No locked batch with this id");
            return;
        };

        if delete {
            self.delete_batch(&file, reason);
        }
        self.locks.unlock_for_read(&file);
    }

    fn delete_batch(&self, file: &Path, reason: RemovalReason) {
        if fs_ext::delete_safe(file, &self.logger) {
            debug!(file = %file.display(), ?reason, "Batch deleted");
        } else {
            self.logger.log(
                Level::Warn,
                &[Target::Maintainer],
                &format!("Unable to delete batch file {}; it may be sent again", file.display()),
                None,
            );
        }
        let metadata_file = batch::metadata_path(file);
        if fs_ext::exists_safe(&metadata_file, &self.logger)
            && !fs_ext::delete_safe(&metadata_file, &self.logger)
        {
            self.logger.log(
                Level::Warn,
                &[Target::Maintainer],
                &format!("Unable to delete batch metadata file {}", metadata_file.display()),
                None,
            );
        }
    }

    /// Read every event of a batch file
    pub fn read_file(&self, file: &Path) -> Vec<RawBatchEvent> {
        self.reader_writer.read_events(file)
    }

    /// Granted batches that can be uploaded right away
    pub fn flushable_files(&self) -> Vec<PathBuf> {
        self.gate.get_flushable_files()
    }

    /// Queue the deletion of every pending and granted batch, locked ones included
    pub fn drop_all(self: &Arc<Self>) -> bool {
        let storage = self.clone();
        self.queue.submit("drop all", move || {
            for file in storage.locks.drain_read_locks() {
                storage.delete_batch(&file, RemovalReason::Flushed);
            }
            for file in storage.gate.get_every_file() {
                storage.delete_batch(&file, RemovalReason::Flushed);
            }
        })
    }

    pub fn on_consent_changed(&self, transition: ConsentTransition) {
        self.gate.on_consent_changed(transition);
    }

    pub fn current_consent(&self) -> ConsentState {
        self.gate.current_consent()
    }
}
