//! Stress tests for the internal logger
//!
//! Persistence tasks, producers and the upload pipeline all log through the
//! same shared logger; these tests verify it holds up under contention.

use std::io;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use vigil_logging::{InternalLogger, Level, MemoryLogger, SharedLogger, Target, TracingLogger};

/// Test concurrent logging from many threads into one memory logger
#[test]
fn test_concurrent_memory_logging() {
    const NUM_THREADS: usize = 32;
    const ITERATIONS: usize = 250;

    let logger = Arc::new(MemoryLogger::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    let start = Instant::now();

    for thread_id in 0..NUM_THREADS {
        let logger = Arc::clone(&logger);
        let barrier = Arc::clone(&barrier);

        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..ITERATIONS {
                logger.debug(&[Target::Maintainer], &format!("thread {thread_id} item {i}"));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(logger.len(), NUM_THREADS * ITERATIONS);
    assert_eq!(logger.records_at(Level::Debug).len(), NUM_THREADS * ITERATIONS);

    let elapsed = start.elapsed();
    println!(
        "Captured {} records across {} threads in {:?}",
        NUM_THREADS * ITERATIONS,
        NUM_THREADS,
        elapsed
    );
}

/// Test that per-thread ordering is preserved in the captured records
#[test]
fn test_per_thread_order_preserved() {
    const NUM_THREADS: usize = 8;
    const ITERATIONS: usize = 500;

    let logger = Arc::new(MemoryLogger::new());
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    logger.info(&[Target::User], &format!("{thread_id}:{i}"));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let records = logger.records();
    for thread_id in 0..NUM_THREADS {
        let prefix = format!("{thread_id}:");
        let sequence: Vec<usize> = records
            .iter()
            .filter_map(|r| r.message.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(sequence, (0..ITERATIONS).collect::<Vec<_>>());
    }
}

/// Test errors and targets survive a trip through a trait object
#[test]
fn test_shared_logger_trait_object() {
    let memory = Arc::new(MemoryLogger::new());
    let shared: SharedLogger = memory.clone();

    let err = io::Error::new(io::ErrorKind::StorageFull, "disk full");
    for _ in 0..1000 {
        shared.error(&[Target::Maintainer, Target::Telemetry], "Unable to write batch", &err);
    }

    let records = memory.records_at(Level::Error);
    assert_eq!(records.len(), 1000);
    assert!(records.iter().all(|r| r.is_for(Target::Telemetry)));
    assert!(records.iter().all(|r| r.error.as_deref() == Some("disk full")));

    let line = serde_json::to_string(&records[0]).unwrap();
    assert!(line.contains("\"level\":\"error\""));
    assert!(line.contains("\"targets\":[\"maintainer\",\"telemetry\"]"));
}

/// Test high volume through the tracing logger with no subscriber installed
#[test]
fn test_tracing_logger_high_volume() {
    const NUM_MESSAGES: usize = 10_000;

    let logger = TracingLogger;
    let start = Instant::now();

    for i in 0..NUM_MESSAGES {
        let level = match i % 5 {
            0 => Level::Verbose,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        };
        logger.log(level, &[Target::Maintainer], "volume", None);
    }

    println!("Logged {} messages in {:?}", NUM_MESSAGES, start.elapsed());
}
