//! Persistence queue
//!
//! A single blocking worker runs every persistence task in submission order.
//! Submitting never blocks the caller. On shutdown the queue stops accepting
//! tasks, drains what was already queued and waits for the worker with a
//! bounded timeout; tasks still queued past the timeout are dropped with a log.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};
use vigil_logging::{Level, SharedLogger, Target};

use crate::error::StorageError;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task { name: String, job: Job },
    Barrier(oneshot::Sender<()>),
}

struct Shared {
    name: String,
    logger: SharedLogger,
    queued: AtomicUsize,
    abandoned: AtomicBool,
}

/// Ordered, single-worker task queue for persistence I/O
#[derive(Clone)]
pub struct PersistenceQueue {
    shared: Arc<Shared>,
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PersistenceQueue {
    /// Start the queue's worker on the current tokio runtime
    pub fn start(name: impl Into<String>, logger: SharedLogger) -> Result<Self, StorageError> {
        let handle = Handle::try_current().map_err(|e| StorageError::NoRuntime(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.into(),
            logger,
            queued: AtomicUsize::new(0),
            abandoned: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let worker = handle.spawn_blocking(move || run_worker(worker_shared, receiver));

        Ok(Self {
            shared,
            sender: Arc::new(Mutex::new(Some(sender))),
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a task; returns false (and logs) if the queue is shut down
    pub fn submit<F>(&self, name: &str, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let accepted = match sender.as_ref() {
            Some(sender) => {
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
                let sent = sender
                    .send(Message::Task {
                        name: name.to_string(),
                        job: Box::new(job),
                    })
                    .is_ok();
                if !sent {
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                }
                sent
            }
            None => false,
        };

        if !accepted {
            self.shared.logger.log(
                Level::Error,
                &[Target::Maintainer, Target::Telemetry],
                &format!("Unable to schedule {name} task on the {} queue", self.shared.name),
                Some(&StorageError::QueueClosed),
            );
        }
        accepted
    }

    /// Wait until every task submitted before this call has run
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(StorageError::QueueClosed)?;
            sender
                .send(Message::Barrier(tx))
                .map_err(|_| StorageError::QueueClosed)?;
        }
        rx.await.map_err(|_| StorageError::QueueClosed)
    }

    /// Number of tasks waiting to run
    pub fn pending_tasks(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks, drain the queue and wait for the worker
    ///
    /// Returns true when every queued task ran before `timeout`.
    #[instrument(skip(self), fields(queue = %self.shared.name))]
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        // Dropping the sender lets the worker exit once the queue is drained
        self.sender.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(())) => {
                debug!("Persistence queue drained");
                true
            }
            Ok(Err(e)) => {
                self.shared.logger.log(
                    Level::Error,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!("Persistence worker of the {} queue failed", self.shared.name),
                    Some(&e),
                );
                false
            }
            Err(_) => {
                self.shared.abandoned.store(true, Ordering::SeqCst);
                self.shared.logger.log(
                    Level::Warn,
                    &[Target::Maintainer, Target::Telemetry],
                    &format!(
                        "Shutdown of the {} queue timed out after {:?}; {} task(s) will be dropped",
                        self.shared.name,
                        timeout,
                        self.pending_tasks()
                    ),
                    None,
                );
                false
            }
        }
    }
}

fn run_worker(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Barrier(done) => {
                let _ = done.send(());
            }
            Message::Task { name, job } => {
                shared.queued.fetch_sub(1, Ordering::SeqCst);
                if shared.abandoned.load(Ordering::SeqCst) {
                    shared.logger.log(
                        Level::Warn,
                        &[Target::Maintainer, Target::Telemetry],
                        &format!("Dropping {name} task after shutdown timeout"),
                        None,
                    );
                    continue;
                }
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    shared.logger.log(
                        Level::Error,
                        &[Target::Maintainer, Target::Telemetry],
                        &format!("Task {name} panicked on the {} queue", shared.name),
                        None,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;

    use vigil_logging::MemoryLogger;

    use super::*;

    fn queue() -> (PersistenceQueue, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        (PersistenceQueue::start("test", logger.clone()).unwrap(), logger)
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let (queue, _) = queue();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            assert!(queue.submit("push", move || seen.lock().push(i)));
        }
        queue.flush().await.unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (queue, logger) = queue();
        assert!(queue.shutdown(Duration::from_secs(1)).await);

        assert!(!queue.submit("late", || {}));
        assert!(queue.is_shut_down());
        assert!(logger.contains(Level::Error, "Unable to schedule late task"));
        assert!(matches!(queue.flush().await, Err(StorageError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let (queue, _) = queue();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let count = count.clone();
            queue.submit("count", move || {
                std::thread::sleep(Duration::from_millis(1));
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(queue.shutdown(Duration::from_secs(5)).await);
        assert_eq!(count.load(Ordering::SeqCst), 50);
        assert_eq!(queue.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_drops_stragglers() {
        let (queue, logger) = queue();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let ran = Arc::new(AtomicBool::new(false));

        queue.submit("blocker", move || {
            let _ = release_rx.recv();
        });
        let ran_clone = ran.clone();
        queue.submit("straggler", move || ran_clone.store(true, Ordering::SeqCst));

        assert!(!queue.shutdown(Duration::from_millis(50)).await);
        release_tx.send(()).unwrap();

        // Give the worker time to reach the straggler
        for _ in 0..100 {
            if logger.contains(Level::Warn, "Dropping straggler task") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(logger.contains(Level::Warn, "timed out"));
        assert!(logger.contains(Level::Warn, "Dropping straggler task"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_queue() {
        let (queue, logger) = queue();
        let ran = Arc::new(AtomicBool::new(false));

        queue.submit("boom", || panic!("task failure"));
        let ran_clone = ran.clone();
        queue.submit("after", move || ran_clone.store(true, Ordering::SeqCst));
        queue.flush().await.unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert!(logger.contains(Level::Error, "Task boom panicked"));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let logger = Arc::new(MemoryLogger::new());
        assert!(matches!(
            PersistenceQueue::start("orphan", logger),
            Err(StorageError::NoRuntime(_))
        ));
    }
}
