//! Context snapshot store
//!
//! Keeps the latest user info, network info and view event on disk so a
//! crash report can be enriched on the next start. Every snapshot file holds
//! three blocks:
//!
//! ```text
//! [LastUpdateDate: i64 BE ms][VersionCode: i32 BE][Data: JSON]
//! ```
//!
//! Files are replaced atomically. A file that is malformed, written by
//! another version or older than the expiry is deleted on read.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;
use vigil_core::{
    Clock, ConsentState, ConsentTransition, ContextSnapshot, NetworkInfo, UserInfo, ViewEvent,
};
use vigil_logging::{Level, SharedLogger, Target};

use crate::config::StorageConfig;
use crate::consent::ConsentAwareFileOrchestrator;
use crate::error::StorageError;
use crate::fs_ext;
use crate::orchestrator::{FileOrchestrator, SingleFileOrchestrator};
use crate::queue::PersistenceQueue;
use crate::tlv::{Block, BlockType, HEADER_SIZE, TlvCodec};
use crate::writer::{DataWriter, ScheduledWriter};

const TARGETS: &[Target] = &[Target::Maintainer, Target::Telemetry];

/// Reads and writes versioned snapshot files
pub struct SnapshotFileReaderWriter {
    codec: TlvCodec,
    version: i32,
    expiry_ms: i64,
    clock: Arc<dyn Clock>,
    logger: SharedLogger,
}

impl SnapshotFileReaderWriter {
    pub fn new(config: &StorageConfig, clock: Arc<dyn Clock>, logger: SharedLogger) -> Self {
        Self {
            codec: TlvCodec::new(
                config.persistence.max_item_size as usize + HEADER_SIZE,
                logger.clone(),
            ),
            version: config.snapshot_version,
            expiry_ms: config.datastore_expiry_ms,
            clock,
            logger,
        }
    }

    /// Replace the snapshot at `path`
    pub fn write<T: ContextSnapshot>(&self, path: &Path, value: &T) -> bool {
        let data = match value.to_snapshot_bytes() {
            Ok(data) => data,
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    TARGETS,
                    &format!("Unable to serialize {} snapshot", T::FILE_NAME),
                    Some(&StorageError::from(e)),
                );
                return false;
            }
        };

        let last_update = self.clock.now_millis().to_be_bytes();
        let version = self.version.to_be_bytes();
        let Some(bytes) = self.codec.encode_all(&[
            (BlockType::LastUpdateDate, &last_update[..]),
            (BlockType::VersionCode, &version[..]),
            (BlockType::Data, &data[..]),
        ]) else {
            return false;
        };

        match fs_ext::write_atomic(path, &bytes) {
            Ok(()) => {
                debug!(file = %path.display(), "Snapshot written");
                true
            }
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    TARGETS,
                    &format!("Unable to write data to file: {}", path.display()),
                    Some(&e),
                );
                false
            }
        }
    }

    /// Read the snapshot at `path`; invalid files are deleted
    pub fn read<T: ContextSnapshot>(&self, path: &Path) -> Option<T> {
        if !fs_ext::exists_safe(path, &self.logger) {
            return None;
        }
        let bytes = fs_ext::read_bytes_safe(path, &self.logger)?;
        match self.validate(self.codec.decode_all(&bytes)) {
            Ok(data) => match T::from_snapshot_bytes(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.logger.log(
                        Level::Error,
                        TARGETS,
                        &format!("Unable to deserialize {} snapshot", T::FILE_NAME),
                        Some(&StorageError::from(e)),
                    );
                    None
                }
            },
            Err(message) => {
                self.logger.log(Level::Error, TARGETS, &message, None);
                fs_ext::delete_safe(path, &self.logger);
                None
            }
        }
    }

    fn validate(&self, blocks: Vec<Block>) -> Result<Bytes, String> {
        if blocks.len() != 3 {
            return Err(format!(
                "Read error - datastore file contains an invalid number of blocks. Was: {}",
                blocks.len()
            ));
        }

        let mut seen = HashSet::new();
        for block in &blocks {
            if !seen.insert(block.block_type) {
                return Err(format!(
                    "Read error - same block appears twice in the datastore. Type: {}",
                    block.block_type
                ));
            }
        }

        let mut last_update = None;
        let mut version = None;
        let mut data = None;
        for block in blocks {
            match block.block_type {
                BlockType::LastUpdateDate => {
                    last_update = <[u8; 8]>::try_from(&block.data[..]).ok().map(i64::from_be_bytes)
                }
                BlockType::VersionCode => {
                    version = <[u8; 4]>::try_from(&block.data[..]).ok().map(i32::from_be_bytes)
                }
                BlockType::Data => data = Some(block.data),
                other => {
                    return Err(format!(
                        "Read error - unexpected block in the datastore. Type: {other}"
                    ));
                }
            }
        }

        let (Some(last_update), Some(version), Some(data)) = (last_update, version, data) else {
            return Err("Read error - datastore file is missing a block".to_string());
        };
        if version != self.version {
            return Err(
                "Read error - datastore file contains wrong version! This should never happen"
                    .to_string(),
            );
        }
        match self.clock.now_millis().checked_sub(last_update) {
            Some(age) if (0..=self.expiry_ms).contains(&age) => {}
            Some(age) if age < 0 => {
                return Err("Read error - datastore entry was written in the future".to_string());
            }
            _ => return Err("Read error - datastore entry has expired".to_string()),
        }
        Ok(data)
    }
}

/// Writes one kind of snapshot through its consent gate
pub struct SnapshotWriter<T> {
    gate: Arc<ConsentAwareFileOrchestrator>,
    reader_writer: Arc<SnapshotFileReaderWriter>,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> SnapshotWriter<T> {
    pub fn new(
        gate: Arc<ConsentAwareFileOrchestrator>,
        reader_writer: Arc<SnapshotFileReaderWriter>,
    ) -> Self {
        Self {
            gate,
            reader_writer,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ContextSnapshot> DataWriter<T> for SnapshotWriter<T> {
    fn write(&self, element: &T) -> bool {
        match self.gate.get_writable_file(false) {
            Some(file) => self.reader_writer.write(&file, element),
            None => false,
        }
    }
}

/// Latest-value store for the context attached to crash reports
pub struct ContextSnapshotStore {
    gates: Vec<Arc<ConsentAwareFileOrchestrator>>,
    user: ScheduledWriter<UserInfo>,
    network: ScheduledWriter<NetworkInfo>,
    view: ScheduledWriter<ViewEvent>,
}

impl ContextSnapshotStore {
    pub fn new(
        config: &StorageConfig,
        queue: PersistenceQueue,
        clock: Arc<dyn Clock>,
        logger: SharedLogger,
        initial_consent: ConsentState,
    ) -> Self {
        let reader_writer = Arc::new(SnapshotFileReaderWriter::new(config, clock, logger.clone()));
        let gate = |file_name: &str| {
            ConsentAwareFileOrchestrator::new(
                FileOrchestrator::Single(SingleFileOrchestrator::new(
                    config.pending_crash_dir().join(file_name),
                    logger.clone(),
                )),
                FileOrchestrator::Single(SingleFileOrchestrator::new(
                    config.crash_dir().join(file_name),
                    logger.clone(),
                )),
                queue.clone(),
                initial_consent,
                logger.clone(),
            )
        };

        let user_gate = gate(UserInfo::FILE_NAME);
        let network_gate = gate(NetworkInfo::FILE_NAME);
        let view_gate = gate(ViewEvent::FILE_NAME);

        Self {
            user: ScheduledWriter::new(
                Arc::new(SnapshotWriter::new(user_gate.clone(), reader_writer.clone())),
                queue.clone(),
            ),
            network: ScheduledWriter::new(
                Arc::new(SnapshotWriter::new(network_gate.clone(), reader_writer.clone())),
                queue.clone(),
            ),
            view: ScheduledWriter::new(
                Arc::new(SnapshotWriter::new(view_gate.clone(), reader_writer)),
                queue,
            ),
            gates: vec![user_gate, network_gate, view_gate],
        }
    }

    pub fn update_user_info(&self, user: UserInfo) -> bool {
        self.user.write(user)
    }

    pub fn update_network_info(&self, network: NetworkInfo) -> bool {
        self.network.write(network)
    }

    pub fn update_last_view_event(&self, view: Value) -> bool {
        self.view.write(ViewEvent(view))
    }

    pub fn on_consent_changed(&self, transition: ConsentTransition) {
        for gate in &self.gates {
            gate.on_consent_changed(transition);
        }
    }
}
