//! Batch files
//!
//! A batch file is a concatenation of event blocks, named after its creation
//! timestamp in milliseconds. An optional `{batch}_metadata` sibling holds
//! opaque per-batch metadata.

mod file;
mod locks;

pub use file::BatchFileReaderWriter;
pub use locks::BatchLocks;

use std::path::{Path, PathBuf};

/// Suffix of the per-batch metadata sibling file
pub const METADATA_SUFFIX: &str = "_metadata";

/// Whether a file name is a batch name (a millisecond timestamp)
pub fn is_batch_file_name(name: &str) -> bool {
    name.parse::<i64>().is_ok()
}

/// Creation timestamp encoded in a batch file name
pub fn batch_timestamp(path: &Path) -> Option<i64> {
    path.file_name()?.to_str()?.parse().ok()
}

/// Path of the metadata sibling of a batch file
pub fn metadata_path(batch: &Path) -> PathBuf {
    let mut name = batch.as_os_str().to_os_string();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}
