//! Events handed to the persistence layer

use serde::{Deserialize, Serialize};

/// A serialized event as stored in a batch file
///
/// `data` is the opaque event payload produced by a feature. `metadata` is
/// optional per-event information the upload pipeline may use for filtering;
/// it is empty when not provided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawBatchEvent {
    pub data: Vec<u8>,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl RawBatchEvent {
    /// Create an event without metadata
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    /// Create an event with metadata
    pub fn with_metadata(data: impl Into<Vec<u8>>, metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: metadata.into(),
        }
    }

    /// Total payload size, excluding any framing
    pub fn payload_len(&self) -> usize {
        self.data.len() + self.metadata.len()
    }
}

impl From<&str> for RawBatchEvent {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

/// Why a batch was removed from storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The upload pipeline received a final response for the batch
    IntakeCode(u16),
    /// The batch could not be read
    Invalid,
    /// Disk quota enforcement
    Purged,
    /// Older than the retention threshold
    Obsolete,
    /// Everything was dropped on request
    Flushed,
}

impl RemovalReason {
    /// Whether removing for this reason should be reported as a data loss
    pub fn includes_in_metrics(&self) -> bool {
        !matches!(self, RemovalReason::Flushed)
    }
}
