//! Batch file reader/writer
//!
//! Each event is stored as an optional `EventMetadata` block (only when the
//! metadata is non-empty) followed by an `Event` block.

use std::path::Path;

use bytes::{BufMut, BytesMut};
use tracing::debug;
use vigil_core::RawBatchEvent;
use vigil_logging::{Level, SharedLogger, Target};

use crate::fs_ext;
use crate::tlv::{BlockType, TlvCodec};

#[derive(Clone)]
pub struct BatchFileReaderWriter {
    codec: TlvCodec,
    logger: SharedLogger,
}

impl BatchFileReaderWriter {
    pub fn new(codec: TlvCodec, logger: SharedLogger) -> Self {
        Self { codec, logger }
    }

    /// Serialize an event into its blocks
    pub fn encode_event(&self, event: &RawBatchEvent) -> Option<Vec<u8>> {
        let mut buf = BytesMut::new();
        if !event.metadata.is_empty() {
            buf.put(self.codec.encode(BlockType::EventMetadata, &event.metadata)?);
        }
        buf.put(self.codec.encode(BlockType::Event, &event.data)?);
        Some(buf.to_vec())
    }

    /// Write an event to `path`, appending or replacing the content
    pub fn write_event(&self, path: &Path, event: &RawBatchEvent, append: bool) -> bool {
        let Some(bytes) = self.encode_event(event) else {
            return false;
        };
        match fs_ext::write_bytes(path, &bytes, append) {
            Ok(()) => {
                debug!(file = %path.display(), len = bytes.len(), "Event written");
                true
            }
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!("Unable to write data to file: {}", path.display()),
                    Some(&e),
                );
                false
            }
        }
    }

    /// Read all events of a batch file
    ///
    /// Events decoded before the first corrupted block are returned.
    pub fn read_events(&self, path: &Path) -> Vec<RawBatchEvent> {
        let Some(bytes) = fs_ext::read_bytes_safe(path, &self.logger) else {
            return Vec::new();
        };

        let decoded = self.codec.decode(&bytes);
        let mut events = Vec::with_capacity(decoded.blocks.len());
        let mut pending_metadata = None;
        let mut complete = decoded.complete;

        for block in decoded.blocks {
            match block.block_type {
                BlockType::EventMetadata if pending_metadata.is_none() => {
                    pending_metadata = Some(block.data);
                }
                BlockType::Event => {
                    events.push(RawBatchEvent {
                        data: block.data.to_vec(),
                        metadata: pending_metadata
                            .take()
                            .map(|m| m.to_vec())
                            .unwrap_or_default(),
                    });
                }
                _ => {
                    complete = false;
                    pending_metadata = None;
                    break;
                }
            }
        }

        if !complete || pending_metadata.is_some() {
            self.logger.log(
                Level::Error,
                &[Target::User, Target::Telemetry],
                &format!("Not all data were read from file: {}", path.display()),
                None,
            );
        }
        events
    }

    /// Replace the batch metadata file content
    pub fn write_metadata(&self, path: &Path, metadata: &[u8]) -> bool {
        match fs_ext::write_bytes(path, metadata, false) {
            Ok(()) => true,
            Err(e) => {
                self.logger.log(
                    Level::Error,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!("Unable to write batch metadata: {}", path.display()),
                    Some(&e),
                );
                false
            }
        }
    }

    /// Read the batch metadata file, if it exists
    pub fn read_metadata(&self, path: &Path) -> Option<Vec<u8>> {
        if !fs_ext::exists_safe(path, &self.logger) {
            return None;
        }
        fs_ext::read_bytes_safe(path, &self.logger)
    }
}
