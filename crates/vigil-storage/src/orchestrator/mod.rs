//! File orchestrators
//!
//! An orchestrator decides which file a write or a read targets:
//!
//! - [`BatchFileOrchestrator`]: a directory of dated batch files with
//!   rotation, cleanup and disk quota
//! - [`SingleFileOrchestrator`]: one fixed file, overwritten on every write
//! - `NoOp`: drops everything (consent not granted)

mod batch;
mod single;

pub use batch::BatchFileOrchestrator;
pub use single::SingleFileOrchestrator;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Closed set of orchestrator variants
pub enum FileOrchestrator {
    Batch(BatchFileOrchestrator),
    Single(SingleFileOrchestrator),
    NoOp,
}

impl FileOrchestrator {
    /// File the next write should target
    ///
    /// `force_new` closes the current batch; single-slot orchestrators ignore it.
    pub fn get_writable_file(&self, force_new: bool) -> Option<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_writable_file(force_new),
            FileOrchestrator::Single(o) => o.get_writable_file(),
            FileOrchestrator::NoOp => None,
        }
    }

    /// Oldest file ready to be read, skipping `exclude`
    pub fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_readable_file(exclude),
            FileOrchestrator::Single(o) => o.get_readable_file(exclude),
            FileOrchestrator::NoOp => None,
        }
    }

    /// Every file managed by the orchestrator, oldest first
    pub fn get_all_files(&self) -> Vec<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_all_files(),
            FileOrchestrator::Single(o) => o.get_all_files(),
            FileOrchestrator::NoOp => Vec::new(),
        }
    }

    /// Files that may be uploaded right away on an explicit flush
    pub fn get_flushable_files(&self) -> Vec<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_flushable_files(),
            FileOrchestrator::Single(o) => o.get_all_files(),
            FileOrchestrator::NoOp => Vec::new(),
        }
    }

    /// Directory holding the files, if usable
    pub fn get_root_dir(&self) -> Option<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_root_dir(),
            FileOrchestrator::Single(o) => o.get_root_dir(),
            FileOrchestrator::NoOp => None,
        }
    }

    /// Metadata sibling of a file, if the orchestrator supports metadata
    pub fn get_metadata_file(&self, file: &Path) -> Option<PathBuf> {
        match self {
            FileOrchestrator::Batch(o) => o.get_metadata_file(file),
            FileOrchestrator::Single(_) | FileOrchestrator::NoOp => None,
        }
    }
}
