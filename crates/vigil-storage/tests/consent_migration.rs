//! Consent transitions observed through the persistence core
//!
//! Writes made while consent is pending must either become uploadable once
//! consent is granted, in write order, or disappear for good when it is
//! refused.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use vigil_core::{ConsentState, ManualClock, RawBatchEvent, RemovalReason};
use vigil_logging::MemoryLogger;
use vigil_storage::{ConsentAwareStorage, PersistenceCore, StorageConfig};

const START: i64 = 1_700_000_000_000;

fn start_core(dir: &TempDir, consent: ConsentState) -> (PersistenceCore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let core = PersistenceCore::builder(StorageConfig::testing(dir.path()))
        .with_clock(clock.clone())
        .with_logger(Arc::new(MemoryLogger::new()))
        .with_initial_consent(consent)
        .start()
        .unwrap();
    (core, clock)
}

fn event(i: usize) -> RawBatchEvent {
    RawBatchEvent::new(format!("event-{i}").into_bytes())
}

/// Drain every readable batch, deleting them as an uploader would
fn upload_all(storage: &ConsentAwareStorage) -> Vec<RawBatchEvent> {
    let mut events = Vec::new();
    while let Some(batch) = storage.read_next_batch() {
        events.extend(batch.events);
        storage.confirm_batch_read(&batch.id, RemovalReason::IntakeCode(202), true);
    }
    events
}

fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_pending_writes_become_readable_in_order_after_grant() {
    let dir = TempDir::new().unwrap();
    let (core, clock) = start_core(&dir, ConsentState::Pending);
    let logs = core.register_feature("logs");

    for i in 0..50 {
        logs.write(event(i), None);
    }
    // No flush: the transition is ordered after the writes by the queue
    core.set_tracking_consent(ConsentState::Granted);
    core.flush().await.unwrap();
    clock.advance(1_000);

    let events = upload_all(&logs);
    assert_eq!(events, (0..50).map(event).collect::<Vec<_>>());
    assert_eq!(file_count(&core.config().pending_dir("logs")), 0);
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_single_write_moves_to_granted() {
    let dir = TempDir::new().unwrap();
    let (core, _clock) = start_core(&dir, ConsentState::Pending);
    let logs = core.register_feature("logs");

    logs.write(RawBatchEvent::from("a"), None);
    core.set_tracking_consent(ConsentState::Granted);
    assert!(core.shutdown().await);

    let granted = core.config().granted_dir("logs");
    let files: Vec<_> = fs::read_dir(&granted)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(logs.read_file(&files[0]), vec![RawBatchEvent::from("a")]);
    assert_eq!(file_count(&core.config().pending_dir("logs")), 0);
}

#[tokio::test]
async fn test_refused_consent_discards_pending_writes() {
    let dir = TempDir::new().unwrap();
    let (core, clock) = start_core(&dir, ConsentState::Pending);
    let logs = core.register_feature("logs");

    for i in 0..10 {
        logs.write(event(i), None);
    }
    core.set_tracking_consent(ConsentState::NotGranted);
    logs.write(event(10), None);
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert!(!core.config().pending_dir("logs").exists());
    assert!(upload_all(&logs).is_empty());

    // Granting later doesn't resurrect anything
    core.set_tracking_consent(ConsentState::Granted);
    core.flush().await.unwrap();
    clock.advance(1_000);
    assert!(upload_all(&logs).is_empty());
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_writes_after_grant_follow_migrated_data() {
    let dir = TempDir::new().unwrap();
    let (core, clock) = start_core(&dir, ConsentState::Pending);
    let logs = core.register_feature("logs");

    logs.write(event(0), None);
    logs.write(event(1), None);
    core.set_tracking_consent(ConsentState::Granted);
    logs.write(event(2), None);
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert_eq!(upload_all(&logs), (0..3).map(event).collect::<Vec<_>>());
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_returning_to_pending_keeps_granted_data() {
    let dir = TempDir::new().unwrap();
    let (core, clock) = start_core(&dir, ConsentState::Granted);
    let logs = core.register_feature("logs");

    logs.write(event(0), None);
    core.set_tracking_consent(ConsentState::Pending);
    logs.write(event(1), None);
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert_eq!(upload_all(&logs), vec![event(0)]);
    assert_eq!(file_count(&core.config().pending_dir("logs")), 1);
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_stale_pending_data_is_wiped_on_start() {
    let dir = TempDir::new().unwrap();
    {
        let (core, _clock) = start_core(&dir, ConsentState::Pending);
        let logs = core.register_feature("logs");
        logs.write(event(0), None);
        assert!(core.shutdown().await);
        assert_eq!(file_count(&core.config().pending_dir("logs")), 1);
    }

    let (core, clock) = start_core(&dir, ConsentState::Pending);
    let logs = core.register_feature("logs");
    core.set_tracking_consent(ConsentState::Granted);
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert!(upload_all(&logs).is_empty());
    assert!(core.shutdown().await);
}

/// Leave one pending batch behind from an earlier process
async fn leave_pending_batch(dir: &TempDir) {
    let (core, _clock) = start_core(dir, ConsentState::Pending);
    let logs = core.register_feature("logs");
    logs.write(RawBatchEvent::from("secret"), None);
    assert!(core.shutdown().await);
    assert_eq!(file_count(&core.config().pending_dir("logs")), 1);
}

#[tokio::test]
async fn test_not_granted_start_wipes_earlier_pending_data() {
    let dir = TempDir::new().unwrap();
    leave_pending_batch(&dir).await;

    let (core, clock) = start_core(&dir, ConsentState::NotGranted);
    let logs = core.register_feature("logs");
    core.flush().await.unwrap();
    assert_eq!(file_count(&core.config().pending_dir("logs")), 0);

    core.set_tracking_consent(ConsentState::Granted);
    core.flush().await.unwrap();
    clock.advance(1_000);
    assert!(upload_all(&logs).is_empty());
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_granted_start_wipes_earlier_pending_data() {
    let dir = TempDir::new().unwrap();
    leave_pending_batch(&dir).await;

    let (core, clock) = start_core(&dir, ConsentState::Granted);
    let logs = core.register_feature("logs");
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert_eq!(file_count(&core.config().pending_dir("logs")), 0);
    assert!(upload_all(&logs).is_empty());
    assert!(core.shutdown().await);
}

#[tokio::test]
async fn test_clear_all_data_removes_every_area() {
    let dir = TempDir::new().unwrap();
    let (core, clock) = start_core(&dir, ConsentState::Granted);
    let logs = core.register_feature("logs");
    let rum = core.register_feature("rum");

    logs.write(event(0), None);
    rum.write(event(1), None);
    core.clear_all_data();
    core.flush().await.unwrap();
    clock.advance(1_000);

    assert!(upload_all(&logs).is_empty());
    assert!(upload_all(&rum).is_empty());
    assert!(core.shutdown().await);
}
