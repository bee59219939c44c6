//! Multi-batch orchestrator
//!
//! Manages a directory of batch files named after their creation timestamp.
//! Writes go to the latest file while it is recent, small enough and not
//! locked for upload; reads pick the oldest file that is no longer recent.
//! Obsolete files are deleted and the disk quota enforced, at most once per
//! cleanup period.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use vigil_core::Clock;
use vigil_logging::{Level, SharedLogger, Target};

use crate::batch::{self, BatchLocks};
use crate::config::FilePersistenceConfig;
use crate::fs_ext;

/// Reads wait a bit longer than writes before treating a file as closed
const DECREASE_PERCENT: f64 = 0.95;
const INCREASE_PERCENT: f64 = 1.05;

const TARGETS: &[Target] = &[Target::Maintainer, Target::Telemetry];

/// Bookkeeping about the file currently receiving writes
#[derive(Debug, Default)]
struct WriterState {
    previous_file: Option<PathBuf>,
    previous_item_count: u64,
    last_created_timestamp: i64,
}

pub struct BatchFileOrchestrator {
    root_dir: PathBuf,
    config: FilePersistenceConfig,
    clock: Arc<dyn Clock>,
    logger: SharedLogger,
    locks: Arc<BatchLocks>,
    recent_read_delay_ms: i64,
    recent_write_delay_ms: i64,
    state: Mutex<WriterState>,
    last_cleanup_ms: AtomicI64,
}

impl BatchFileOrchestrator {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        config: FilePersistenceConfig,
        clock: Arc<dyn Clock>,
        logger: SharedLogger,
        locks: Arc<BatchLocks>,
    ) -> Self {
        let recent_read_delay_ms = (config.recent_delay_ms as f64 * INCREASE_PERCENT).round() as i64;
        let recent_write_delay_ms = (config.recent_delay_ms as f64 * DECREASE_PERCENT).round() as i64;
        Self {
            root_dir: root_dir.into(),
            config,
            clock,
            logger,
            locks,
            recent_read_delay_ms,
            recent_write_delay_ms,
            state: Mutex::new(WriterState::default()),
            last_cleanup_ms: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    pub fn get_writable_file(&self, force_new: bool) -> Option<PathBuf> {
        if !self.is_root_dir_valid() {
            return None;
        }

        if self.can_do_cleanup() {
            let files = self.delete_obsolete_files(self.list_batch_files());
            self.free_space_if_needed(files);
            self.last_cleanup_ms
                .store(self.clock.now_millis(), Ordering::SeqCst);
        }

        let mut state = self.state.lock();
        if !force_new {
            if let Some(file) = self.reusable_writable_file(&mut state) {
                return Some(file);
            }
        }
        Some(self.create_new_file(&mut state))
    }

    pub fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        if !self.is_root_dir_valid() {
            return None;
        }

        let files = self.delete_obsolete_files(self.list_batch_files());
        self.last_cleanup_ms
            .store(self.clock.now_millis(), Ordering::SeqCst);

        files.into_iter().find(|file| {
            !exclude.contains(file)
                && !self.locks.is_open_for_write(file)
                && !self.is_file_recent(file, self.recent_read_delay_ms)
        })
    }

    pub fn get_all_files(&self) -> Vec<PathBuf> {
        if !self.is_root_dir_valid() {
            return Vec::new();
        }
        self.list_batch_files()
    }

    pub fn get_flushable_files(&self) -> Vec<PathBuf> {
        self.get_all_files()
    }

    pub fn get_root_dir(&self) -> Option<PathBuf> {
        if !self.is_root_dir_valid() {
            return None;
        }
        Some(self.root_dir.clone())
    }

    pub fn get_metadata_file(&self, file: &Path) -> Option<PathBuf> {
        if file.parent() != Some(self.root_dir.as_path()) {
            self.logger.log(
                Level::Debug,
                TARGETS,
                &format!(
                    "The file provided ({}) doesn't belong to the current folder ({})",
                    file.display(),
                    self.root_dir.display()
                ),
                None,
            );
        }

        let is_batch = file
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(batch::is_batch_file_name);
        if is_batch {
            Some(batch::metadata_path(file))
        } else {
            self.logger.log(
                Level::Error,
                TARGETS,
                &format!("The file provided is not a batch file: {}", file.display()),
                None,
            );
            None
        }
    }

    fn is_root_dir_valid(&self) -> bool {
        if fs_ext::exists_safe(&self.root_dir, &self.logger) {
            if !self.root_dir.is_dir() {
                self.logger.log(
                    Level::Error,
                    TARGETS,
                    &format!(
                        "The provided root file is not a directory: {}",
                        self.root_dir.display()
                    ),
                    None,
                );
                return false;
            }
            if !fs_ext::can_write_safe(&self.root_dir, &self.logger) {
                self.logger.log(
                    Level::Error,
                    TARGETS,
                    &format!(
                        "The provided root dir is not writable: {}",
                        self.root_dir.display()
                    ),
                    None,
                );
                return false;
            }
            true
        } else {
            let created = fs_ext::mkdirs_safe(&self.root_dir, &self.logger);
            if !created {
                self.logger.log(
                    Level::Error,
                    TARGETS,
                    &format!(
                        "The provided root dir can't be created: {}",
                        self.root_dir.display()
                    ),
                    None,
                );
            }
            created
        }
    }

    fn create_new_file(&self, state: &mut WriterState) -> PathBuf {
        let now = self.clock.now_millis();
        let mut timestamp = now.max(state.last_created_timestamp + 1);
        while self.root_dir.join(timestamp.to_string()).exists() {
            timestamp += 1;
        }
        let file = self.root_dir.join(timestamp.to_string());

        if let Some(closed) = state.previous_file.take() {
            debug!(
                batch = %closed.display(),
                events = state.previous_item_count,
                "Batch closed"
            );
        }
        state.previous_file = Some(file.clone());
        state.previous_item_count = 1;
        state.last_created_timestamp = timestamp;
        file
    }

    fn reusable_writable_file(&self, state: &mut WriterState) -> Option<PathBuf> {
        let last_file = self.list_batch_files().pop()?;

        // Unknown item count (previous session, or our file was deleted): start fresh
        if state.previous_file.as_ref() != Some(&last_file) {
            return None;
        }
        if self.locks.is_locked_for_read(&last_file) {
            return None;
        }

        let is_recent_enough = self.is_file_recent(&last_file, self.recent_write_delay_ms);
        let has_room_for_more =
            fs_ext::len_safe(&last_file, &self.logger) < self.config.max_batch_size;
        let has_slot_for_more = state.previous_item_count < self.config.max_items_per_batch;

        if is_recent_enough && has_room_for_more && has_slot_for_more {
            state.previous_item_count += 1;
            Some(last_file)
        } else {
            None
        }
    }

    fn is_file_recent(&self, file: &Path, delay_ms: i64) -> bool {
        let now = self.clock.now_millis();
        let timestamp = batch::batch_timestamp(file).unwrap_or(0);
        timestamp >= now - delay_ms
    }

    fn delete_obsolete_files(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let threshold = self.clock.now_millis() - self.config.old_file_threshold_ms;
        files
            .into_iter()
            .filter(|file| {
                let is_old = batch::batch_timestamp(file).unwrap_or(0) < threshold;
                if is_old {
                    debug!(batch = %file.display(), "Deleting obsolete batch");
                    fs_ext::delete_safe(file, &self.logger);
                    let metadata = batch::metadata_path(file);
                    if fs_ext::exists_safe(&metadata, &self.logger) {
                        fs_ext::delete_safe(&metadata, &self.logger);
                    }
                }
                !is_old
            })
            .collect()
    }

    fn free_space_if_needed(&self, files: Vec<PathBuf>) {
        let size_on_disk: u64 = files
            .iter()
            .map(|f| fs_ext::len_safe(f, &self.logger))
            .sum();
        let max_disk_space = self.config.max_disk_space;
        if size_on_disk <= max_disk_space {
            return;
        }

        let size_to_free = size_on_disk - max_disk_space;
        self.logger.log(
            Level::Error,
            TARGETS,
            &format!(
                "Too much disk space used ({size_on_disk}/{max_disk_space}): cleaning up to free {size_to_free} bytes…"
            ),
            None,
        );

        let mut remaining = size_to_free;
        for file in files {
            if remaining == 0 {
                break;
            }
            let freed = self.delete_file(&file) + self.delete_file(&batch::metadata_path(&file));
            remaining = remaining.saturating_sub(freed);
        }
    }

    fn delete_file(&self, file: &Path) -> u64 {
        if !fs_ext::exists_safe(file, &self.logger) {
            return 0;
        }
        let size = fs_ext::len_safe(file, &self.logger);
        if fs_ext::delete_safe(file, &self.logger) {
            size
        } else {
            0
        }
    }

    /// Batch files in the root directory, oldest first
    fn list_batch_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<(i64, PathBuf)> = fs_ext::list_files_safe(&self.root_dir, &self.logger)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|f| batch::batch_timestamp(&f).map(|ts| (ts, f)))
            .collect();
        files.sort();
        files.into_iter().map(|(_, f)| f).collect()
    }

    fn can_do_cleanup(&self) -> bool {
        self.clock.now_millis() - self.last_cleanup_ms.load(Ordering::SeqCst)
            > self.config.cleanup_frequency_ms
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use vigil_core::ManualClock;
    use vigil_logging::MemoryLogger;

    use super::*;

    const START: i64 = 1_700_000_000_000;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        clock: Arc<ManualClock>,
        logger: Arc<MemoryLogger>,
        locks: Arc<BatchLocks>,
        orchestrator: BatchFileOrchestrator,
    }

    fn fixture(config: FilePersistenceConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("logs_v2");
        let clock = Arc::new(ManualClock::new(START));
        let logger = Arc::new(MemoryLogger::new());
        let locks = Arc::new(BatchLocks::new());
        let orchestrator = BatchFileOrchestrator::new(
            &root,
            config,
            clock.clone(),
            logger.clone(),
            locks.clone(),
        );
        Fixture {
            _dir: dir,
            root,
            clock,
            logger,
            locks,
            orchestrator,
        }
    }

    fn write(file: &Path, content: &[u8]) {
        let mut data = fs::read(file).unwrap_or_default();
        data.extend_from_slice(content);
        fs::write(file, data).unwrap();
    }

    #[test]
    fn test_creates_root_dir_and_names_file_after_time() {
        let f = fixture(FilePersistenceConfig::default());

        let file = f.orchestrator.get_writable_file(false).unwrap();
        assert!(f.root.is_dir());
        assert_eq!(file, f.root.join(START.to_string()));
    }

    #[test]
    fn test_reuses_recent_file() {
        let f = fixture(FilePersistenceConfig::default());

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        f.clock.advance(100);
        let second = f.orchestrator.get_writable_file(false).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_force_new_rotates() {
        let f = fixture(FilePersistenceConfig::default());

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        let second = f.orchestrator.get_writable_file(true).unwrap();

        assert_ne!(first, second);
        assert!(batch::batch_timestamp(&second) > batch::batch_timestamp(&first));
    }

    #[test]
    fn test_rotates_when_file_too_old() {
        let f = fixture(FilePersistenceConfig::default());

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        f.clock.advance(5_000);
        let second = f.orchestrator.get_writable_file(false).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_rotates_when_file_too_large() {
        let f = fixture(FilePersistenceConfig {
            max_batch_size: 4,
            ..Default::default()
        });

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"abcd");
        let second = f.orchestrator.get_writable_file(false).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_rotates_when_item_count_reached() {
        let f = fixture(FilePersistenceConfig {
            max_items_per_batch: 2,
            ..Default::default()
        });

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        assert_eq!(f.orchestrator.get_writable_file(false).unwrap(), first);
        write(&first, b"b");
        assert_ne!(f.orchestrator.get_writable_file(false).unwrap(), first);
    }

    #[test]
    fn test_rotates_when_file_locked_for_upload() {
        let f = fixture(FilePersistenceConfig::default());

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        assert!(f.locks.lock_for_read(&first));

        let second = f.orchestrator.get_writable_file(false).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_does_not_reuse_file_from_previous_session() {
        let f = fixture(FilePersistenceConfig::default());
        fs::create_dir_all(&f.root).unwrap();
        let stale = f.root.join(START.to_string());
        write(&stale, b"a");

        let file = f.orchestrator.get_writable_file(false).unwrap();
        assert_ne!(file, stale);
    }

    #[test]
    fn test_readable_file_skips_recent_and_excluded() {
        let f = fixture(FilePersistenceConfig::default());

        let first = f.orchestrator.get_writable_file(false).unwrap();
        write(&first, b"a");
        assert!(f.orchestrator.get_readable_file(&HashSet::new()).is_none());

        f.clock.advance(6_000);
        let second = f.orchestrator.get_writable_file(false).unwrap();
        write(&second, b"b");
        assert_eq!(f.orchestrator.get_readable_file(&HashSet::new()), Some(first.clone()));

        let exclude: HashSet<_> = [first].into_iter().collect();
        assert!(f.orchestrator.get_readable_file(&exclude).is_none());
    }

    #[test]
    fn test_readable_file_skips_file_open_for_write() {
        let f = fixture(FilePersistenceConfig {
            recent_delay_ms: 0,
            ..Default::default()
        });

        let file = f.orchestrator.get_writable_file(false).unwrap();
        write(&file, b"a");
        f.clock.advance(1);
        f.locks.open_for_write(&file);
        assert!(f.orchestrator.get_readable_file(&HashSet::new()).is_none());

        f.locks.close_for_write(&file);
        assert_eq!(f.orchestrator.get_readable_file(&HashSet::new()), Some(file));
    }

    #[test]
    fn test_obsolete_files_are_deleted() {
        let f = fixture(FilePersistenceConfig::default());
        fs::create_dir_all(&f.root).unwrap();
        let old = f.root.join((START - 19 * 60 * 60 * 1000).to_string());
        write(&old, b"old");
        write(&batch::metadata_path(&old), b"meta");

        f.clock.advance(10_000);
        assert!(f.orchestrator.get_readable_file(&HashSet::new()).is_none());
        assert!(!old.exists());
        assert!(!batch::metadata_path(&old).exists());
    }

    #[test]
    fn test_disk_quota_deletes_oldest_first() {
        let f = fixture(FilePersistenceConfig {
            max_disk_space: 10,
            cleanup_frequency_ms: 0,
            ..Default::default()
        });
        fs::create_dir_all(&f.root).unwrap();
        let oldest = f.root.join((START - 3_000).to_string());
        let middle = f.root.join((START - 2_000).to_string());
        let newest = f.root.join((START - 1_000).to_string());
        write(&oldest, b"123456");
        write(&middle, b"123456");
        write(&newest, b"123");

        f.orchestrator.get_writable_file(false).unwrap();

        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
        assert!(f.logger.contains(Level::Error, "Too much disk space used (15/10)"));
    }

    #[test]
    fn test_metadata_file() {
        let f = fixture(FilePersistenceConfig::default());
        let file = f.root.join("1234");

        assert_eq!(
            f.orchestrator.get_metadata_file(&file),
            Some(f.root.join("1234_metadata"))
        );
        assert!(f.orchestrator.get_metadata_file(&f.root.join("not_a_batch")).is_none());
        assert!(f.logger.contains(Level::Error, "not a batch file"));
    }

    #[test]
    fn test_root_is_a_file() {
        let f = fixture(FilePersistenceConfig::default());
        fs::write(&f.root, b"oops").unwrap();

        assert!(f.orchestrator.get_writable_file(false).is_none());
        assert!(f.orchestrator.get_all_files().is_empty());
        assert!(f.orchestrator.get_root_dir().is_none());
        assert!(f.logger.contains(Level::Error, "not a directory"));
    }

    #[test]
    fn test_all_files_sorted_numerically() {
        let f = fixture(FilePersistenceConfig::default());
        fs::create_dir_all(&f.root).unwrap();
        for name in ["900", "1000", "1000_metadata", "99"] {
            write(&f.root.join(name), b"x");
        }

        assert_eq!(
            f.orchestrator.get_all_files(),
            vec![f.root.join("99"), f.root.join("900"), f.root.join("1000")]
        );
    }
}
