//! Advisory batch locks
//!
//! Cooperative, path-keyed lock sets shared by the writer and the upload
//! reader. A file open for writing is never handed to an uploader, and a file
//! locked by an uploader is never reused for new writes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct LockState {
    open_for_write: HashSet<PathBuf>,
    locked_for_read: HashSet<PathBuf>,
}

/// Both sets live under one mutex so a check and the matching insert can't
/// interleave with the opposite operation.
#[derive(Debug, Default)]
pub struct BatchLocks {
    state: Mutex<LockState>,
}

impl BatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a file as being written; returns false if it's locked for read
    pub fn open_for_write(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        if state.locked_for_read.contains(path) {
            return false;
        }
        state.open_for_write.insert(path.to_path_buf());
        true
    }

    pub fn close_for_write(&self, path: &Path) {
        self.state.lock().open_for_write.remove(path);
    }

    pub fn is_open_for_write(&self, path: &Path) -> bool {
        self.state.lock().open_for_write.contains(path)
    }

    /// Lock a file for upload; returns false if it's already locked or being written
    pub fn lock_for_read(&self, path: &Path) -> bool {
        let mut state = self.state.lock();
        if state.open_for_write.contains(path) {
            return false;
        }
        state.locked_for_read.insert(path.to_path_buf())
    }

    pub fn unlock_for_read(&self, path: &Path) {
        self.state.lock().locked_for_read.remove(path);
    }

    pub fn is_locked_for_read(&self, path: &Path) -> bool {
        self.state.lock().locked_for_read.contains(path)
    }

    /// Files currently locked for upload
    pub fn read_locked(&self) -> HashSet<PathBuf> {
        self.state.lock().locked_for_read.clone()
    }

    /// Files that an upload read must skip
    pub fn unreadable(&self) -> HashSet<PathBuf> {
        let state = self.state.lock();
        state
            .locked_for_read
            .union(&state.open_for_write)
            .cloned()
            .collect()
    }

    /// Release every read lock, returning the files that were locked
    pub fn drain_read_locks(&self) -> Vec<PathBuf> {
        self.state.lock().locked_for_read.drain().collect()
    }
}
