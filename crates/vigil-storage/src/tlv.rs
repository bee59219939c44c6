//! Binary block codec
//!
//! Every record on disk is a self-describing block:
//!
//! ```text
//! +-  2 bytes -+-   4 bytes   -+- n bytes -+
//! | block type | data size (n) |    data   |
//! +------------+---------------+-----------+
//! ```
//!
//! All integers are big-endian. Files are plain concatenations of blocks, so
//! appending to a file never invalidates what was written before, and a torn
//! write only costs the trailing block.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vigil_logging::{Level, SharedLogger, Target};

use crate::error::StorageError;

/// Size of the block header (type + length)
pub const HEADER_SIZE: usize = 6;

/// Discriminator of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BlockType {
    Event = 0x00,
    EventMetadata = 0x01,
    LastUpdateDate = 0x02,
    VersionCode = 0x03,
    Data = 0x04,
}

impl BlockType {
    /// Map a raw discriminator to a known block type
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Event),
            0x01 => Some(Self::EventMetadata),
            0x02 => Some(Self::LastUpdateDate),
            0x03 => Some(Self::VersionCode),
            0x04 => Some(Self::Data),
            _ => None,
        }
    }

    /// Raw discriminator
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Event => "EVENT",
            BlockType::EventMetadata => "EVENT_METADATA",
            BlockType::LastUpdateDate => "LAST_UPDATE_DATE",
            BlockType::VersionCode => "VERSION_CODE",
            BlockType::Data => "DATA",
        };
        f.write_str(name)
    }
}

/// A decoded block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub data: Bytes,
}

impl Block {
    pub fn new(block_type: BlockType, data: impl Into<Bytes>) -> Self {
        Self {
            block_type,
            data: data.into(),
        }
    }

    /// Size of the block once encoded
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// Result of decoding a buffer
#[derive(Debug, Default)]
pub struct Decoded {
    /// Blocks decoded before the first error, if any
    pub blocks: Vec<Block>,
    /// Number of input bytes covered by `blocks`
    pub consumed: usize,
    /// Whether the whole input was decoded
    pub complete: bool,
}

/// Encoder/decoder for blocks
#[derive(Clone)]
pub struct TlvCodec {
    max_block_size: usize,
    logger: SharedLogger,
}

impl TlvCodec {
    /// Create a codec rejecting blocks larger than `max_block_size` (header included)
    pub fn new(max_block_size: usize, logger: SharedLogger) -> Self {
        Self {
            max_block_size,
            logger,
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Encode a single block
    ///
    /// Empty payloads and blocks exceeding the max size are rejected and logged.
    pub fn encode(&self, block_type: BlockType, data: &[u8]) -> Option<Bytes> {
        if data.is_empty() {
            self.logger.log(
                Level::Warn,
                &[Target::Maintainer],
                &format!("Attempt to serialize empty data for block type {block_type}"),
                None,
            );
            return None;
        }

        let size = HEADER_SIZE + data.len();
        if size > self.max_block_size {
            let err = StorageError::CapacityExceeded {
                size: size as u64,
                max: self.max_block_size as u64,
            };
            self.logger.log(
                Level::Error,
                &[Target::Maintainer],
                &format!("Block of type {block_type} is too large to be serialized"),
                Some(&err),
            );
            return None;
        }

        let Ok(len) = u32::try_from(data.len()) else {
            return None;
        };

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u16(block_type.raw());
        buf.put_u32(len);
        buf.put_slice(data);
        Some(buf.freeze())
    }

    /// Encode several blocks back to back; fails if any block is rejected
    pub fn encode_all(&self, blocks: &[(BlockType, &[u8])]) -> Option<Bytes> {
        let mut buf = BytesMut::new();
        for (block_type, data) in blocks {
            buf.put(self.encode(*block_type, data)?);
        }
        Some(buf.freeze())
    }

    /// Decode every block until the end of input or the first malformed block
    pub fn decode_all(&self, bytes: &[u8]) -> Vec<Block> {
        self.decode(bytes).blocks
    }

    /// Decode, reporting how much of the input was valid
    ///
    /// Never panics on malformed input. An unknown type or a length running
    /// past the end of the buffer stops decoding; the valid prefix is kept.
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        let mut input = Bytes::copy_from_slice(bytes);
        let mut decoded = Decoded::default();

        while input.has_remaining() {
            if input.remaining() < HEADER_SIZE {
                self.report(StorageError::corruption(format!(
                    "failed to deserialize: {} trailing bytes are shorter than a block header",
                    input.remaining()
                )));
                return decoded;
            }

            let raw_type = input.get_u16();
            let Some(block_type) = BlockType::from_raw(raw_type) else {
                self.report(StorageError::corruption(format!(
                    "corrupt header type {raw_type} at offset {}",
                    decoded.consumed
                )));
                return decoded;
            };

            let len = input.get_u32() as usize;
            if len > input.remaining() {
                self.report(StorageError::corruption(format!(
                    "failed to deserialize: block of type {block_type} declares {len} bytes, {} available",
                    input.remaining()
                )));
                return decoded;
            }

            let data = input.split_to(len);
            decoded.consumed += HEADER_SIZE + len;
            decoded.blocks.push(Block { block_type, data });
        }

        decoded.complete = true;
        decoded
    }

    fn report(&self, err: StorageError) {
        self.logger.log(
            Level::Error,
            &[Target::Maintainer, Target::Telemetry],
            "Unable to decode all blocks",
            Some(&err),
        );
    }
}
