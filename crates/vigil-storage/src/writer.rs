//! Data writers
//!
//! A [`DataWriter`] persists one element synchronously. [`ScheduledWriter`]
//! moves that work onto the persistence queue so callers never block on I/O.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::queue::PersistenceQueue;

/// Synchronous element writer, run on the persistence queue
pub trait DataWriter<T>: Send + Sync {
    /// Persist `element`; returns false if it was dropped
    fn write(&self, element: &T) -> bool;
}

/// Fire-and-forget writer backed by the persistence queue
pub struct ScheduledWriter<T> {
    delegate: Arc<dyn DataWriter<T>>,
    queue: PersistenceQueue,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for ScheduledWriter<T> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            queue: self.queue.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> ScheduledWriter<T> {
    pub fn new(delegate: Arc<dyn DataWriter<T>>, queue: PersistenceQueue) -> Self {
        Self {
            delegate,
            queue,
            _marker: PhantomData,
        }
    }

    /// Queue `element` for writing; returns false if the queue rejected it
    pub fn write(&self, element: T) -> bool {
        let delegate = self.delegate.clone();
        self.queue.submit("write", move || {
            delegate.write(&element);
        })
    }
}
