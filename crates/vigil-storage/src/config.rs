//! Storage configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long events are buffered in a batch before it is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl BatchSize {
    /// Window during which a batch file keeps accepting writes
    pub fn window_duration_ms(self) -> i64 {
        match self {
            BatchSize::Small => 1_000,
            BatchSize::Medium => 5_000,
            BatchSize::Large => 10_000,
        }
    }
}

/// Limits applied to batch files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePersistenceConfig {
    /// Age below which a batch file is considered "recent"
    pub recent_delay_ms: i64,
    /// Size above which a batch file is closed
    pub max_batch_size: u64,
    /// Largest single event accepted
    pub max_item_size: u64,
    /// Number of events after which a batch file is closed
    pub max_items_per_batch: u64,
    /// Age above which a batch file is deleted without being uploaded
    pub old_file_threshold_ms: i64,
    /// Disk budget for a single orchestrator directory
    pub max_disk_space: u64,
    /// Minimum time between two cleanup passes
    pub cleanup_frequency_ms: i64,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        Self {
            recent_delay_ms: BatchSize::Medium.window_duration_ms(),
            max_batch_size: 4 * 1024 * 1024, // 4MB
            max_item_size: 512 * 1024,       // 512KB
            max_items_per_batch: 500,
            old_file_threshold_ms: 18 * 60 * 60 * 1000, // 18h
            max_disk_space: 128 * 1024 * 1024,          // 128MB
            cleanup_frequency_ms: 5_000,
        }
    }
}

impl FilePersistenceConfig {
    /// Config with the batch window of the given size preset
    pub fn for_batch_size(batch_size: BatchSize) -> Self {
        Self {
            recent_delay_ms: batch_size.window_duration_ms(),
            ..Default::default()
        }
    }

    /// Small files, closed often; suited to constrained devices
    pub fn constrained() -> Self {
        Self {
            recent_delay_ms: BatchSize::Small.window_duration_ms(),
            max_batch_size: 512 * 1024,      // 512KB
            max_item_size: 64 * 1024,        // 64KB
            max_items_per_batch: 100,
            max_disk_space: 16 * 1024 * 1024, // 16MB
            ..Default::default()
        }
    }
}

/// What to do with a crash marker when no UI context is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingViewPolicy {
    /// Drop the crash; it cannot be attributed to a view
    #[default]
    Drop,
    /// Emit the crash without any view information
    EmitWithoutView,
}

/// Configuration of the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of every storage directory
    pub root_dir: PathBuf,
    /// Version suffix of the directory layout (`{feature}_v{N}`)
    pub storage_version: u32,
    /// Version code written in every snapshot file
    pub snapshot_version: i32,
    /// Snapshots older than this are discarded on read
    pub datastore_expiry_ms: i64,
    /// Bounded wait for queued tasks on shutdown
    pub shutdown_timeout_ms: u64,
    /// Batch file limits
    pub persistence: FilePersistenceConfig,
    /// Crash recovery behavior without UI context
    pub missing_view_policy: MissingViewPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/vigil"),
            storage_version: 2,
            snapshot_version: 1,
            datastore_expiry_ms: 30 * 24 * 60 * 60 * 1000, // 30 days
            shutdown_timeout_ms: 5_000,
            persistence: FilePersistenceConfig::default(),
            missing_view_policy: MissingViewPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Config rooted at `root_dir` with default limits
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Config for tests: no batch window, no cleanup throttling
    pub fn testing(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            shutdown_timeout_ms: 1_000,
            persistence: FilePersistenceConfig {
                recent_delay_ms: 0,
                cleanup_frequency_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_persistence(mut self, persistence: FilePersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_missing_view_policy(mut self, policy: MissingViewPolicy) -> Self {
        self.missing_view_policy = policy;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Granted directory of a feature
    pub fn granted_dir(&self, feature: &str) -> PathBuf {
        self.root_dir
            .join(format!("{}_v{}", feature, self.storage_version))
    }

    /// Pending (intermediary) directory of a feature
    pub fn pending_dir(&self, feature: &str) -> PathBuf {
        self.root_dir
            .join(format!("{}_v{}_intermediary", feature, self.storage_version))
    }

    /// Granted crash directory, shared with the native crash handler
    pub fn crash_dir(&self) -> PathBuf {
        self.granted_dir(CRASH_REPORTS_FEATURE)
    }

    /// Pending crash directory, holding snapshots taken before consent
    pub fn pending_crash_dir(&self) -> PathBuf {
        self.pending_dir(CRASH_REPORTS_FEATURE)
    }
}

/// Feature name of the crash directories
pub const CRASH_REPORTS_FEATURE: &str = "crash_reports";
