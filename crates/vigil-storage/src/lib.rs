//! # Vigil Storage
//!
//! Local persistence for Vigil features: consent-aware batch files, context
//! snapshots and native crash recovery.
//!
//! ## Features
//!
//! - **TlvCodec**: `[type:u16][len:u32][payload]` block codec shared by every file
//! - **ConsentAwareStorage**: per-feature batch storage routed by tracking consent
//! - **ContextSnapshotStore**: latest user, network and view context, replaced atomically
//! - **CrashRecoveryReader**: turns a native crash marker into one recovered event
//! - **PersistenceQueue**: a single ordered worker for every write and migration
//! - **PersistenceCore**: the composition root tying all of the above together
//!
//! ## Directory layout
//!
//! ```text
//! {root}/{feature}_v2/                      granted batches
//! {root}/{feature}_v2_intermediary/         batches collected while consent is pending
//! {root}/crash_reports_v2/                  crash marker + granted snapshots
//! {root}/crash_reports_v2_intermediary/     snapshots collected while consent is pending
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_core::{ConsentState, RawBatchEvent, UserInfo};
//! use vigil_storage::{PersistenceCore, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let core = PersistenceCore::builder(StorageConfig::new("/tmp/vigil"))
//!         .start()
//!         .unwrap();
//!
//!     let logs = core.register_feature("logs");
//!     logs.write(RawBatchEvent::from("{\"message\":\"hello\"}"), None);
//!     core.snapshots().update_user_info(UserInfo::with_id("u-42"));
//!
//!     // Pending data moves to the granted area and becomes uploadable
//!     core.set_tracking_consent(ConsentState::Granted);
//!
//!     core.shutdown().await;
//! }
//! ```

pub mod batch;
pub mod config;
pub mod consent;
pub mod crash;
pub mod datastore;
pub mod error;
pub mod fs_ext;
pub mod orchestrator;
pub mod persistence;
pub mod queue;
pub mod storage;
pub mod tlv;
pub mod writer;

// Re-exports
pub use batch::{BatchFileReaderWriter, BatchLocks};
pub use config::{
    BatchSize, CRASH_REPORTS_FEATURE, FilePersistenceConfig, MissingViewPolicy, StorageConfig,
};
pub use consent::{ConsentAwareFileOrchestrator, DataMigrator, MigrationOperation};
pub use crash::{
    CrashRecoveryReader, PersistedUiContext, RecoveredCrash, RecoveredEventSink,
    UiContextSupplier,
};
pub use datastore::{ContextSnapshotStore, SnapshotFileReaderWriter, SnapshotWriter};
pub use error::{StorageError, StorageResult};
pub use orchestrator::{BatchFileOrchestrator, FileOrchestrator, SingleFileOrchestrator};
pub use persistence::{PersistenceCore, PersistenceCoreBuilder};
pub use queue::PersistenceQueue;
pub use storage::{BatchData, BatchId, BatchWriteContext, ConsentAwareStorage};
pub use tlv::{Block, BlockType, Decoded, HEADER_SIZE, TlvCodec};
pub use writer::{DataWriter, ScheduledWriter};
