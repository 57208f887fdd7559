//! Typed event stream with predicate filters and await-with-timeout.
//!
//! A filter subscribes at the moment it is created, so every event emitted
//! after `filter()` returns is buffered for it even if `wait_for` is called
//! later. Events emitted before the filter existed are never replayed.

use crate::error::WaitError;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Multi-consumer stream of engine notifications.
#[derive(Debug, Clone)]
pub struct EventStream<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Delivers `event` to every attached filter. Returns how many saw it.
    pub fn emit(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn filter<F>(&self, predicate: F) -> EventFilter<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        EventFilter {
            rx: self.tx.subscribe(),
            predicate: Box::new(predicate),
        }
    }

    pub fn attach(&self) -> EventFilter<T> {
        self.filter(|_| true)
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A narrowed view of an [`EventStream`].
pub struct EventFilter<T> {
    rx: broadcast::Receiver<T>,
    predicate: Predicate<T>,
}

impl<T: Clone + Send + 'static> EventFilter<T> {
    /// Narrows the filter further; both predicates must hold.
    pub fn and<F>(self, next: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let current = self.predicate;
        Self {
            rx: self.rx,
            predicate: Box::new(move |event| current(event) && next(event)),
        }
    }

    /// Suspends until a matching event arrives, or fails after `timeout`.
    /// `None` waits indefinitely. Safe to call again after a timeout.
    pub async fn wait_for(&mut self, timeout: Option<Duration>) -> Result<T, WaitError> {
        match timeout {
            None => self.next_match().await,
            Some(limit) => tokio::time::timeout(limit, self.next_match())
                .await
                .map_err(|_| WaitError::Timeout(limit))?,
        }
    }

    async fn next_match(&mut self) -> Result<T, WaitError> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event filter fell behind the stream, events dropped");
                }
                Err(RecvError::Closed) => return Err(WaitError::Closed),
            }
        }
    }
}
