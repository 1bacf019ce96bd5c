use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bluesense_core::{StatusEvent, Summary};

use super::Reporter;

/// A record accepted by [`MemoryReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Posted {
    Event(StatusEvent),
    Summary(Summary),
}

/// In-memory reporter.
/// Intended for tests and as a reference implementation of the
/// Reporter trait. It can be told to reject posts to simulate an
/// unreachable store.
#[derive(Clone, Default)]
pub struct MemoryReporter {
    posted: Arc<Mutex<Vec<Posted>>>,
    rejecting: Arc<AtomicBool>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryReporterError {
    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),

    #[error("store rejected the post")]
    Rejected,
}

impl<T> From<PoisonError<T>> for MemoryReporterError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryReporterError::MutexPoisoned(err.to_string())
    }
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following post fail (or succeed again).
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Everything accepted so far, in post order.
    pub fn posted(&self) -> Vec<Posted> {
        self.posted
            .lock()
            .map(|posted| posted.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.posted()
            .into_iter()
            .filter_map(|p| match p {
                Posted::Event(event) => Some(event),
                Posted::Summary(_) => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<Summary> {
        self.posted()
            .into_iter()
            .filter_map(|p| match p {
                Posted::Summary(summary) => Some(summary),
                Posted::Event(_) => None,
            })
            .collect()
    }

    fn accept(&self, record: Posted) -> Result<(), MemoryReporterError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(MemoryReporterError::Rejected);
        }
        self.posted.lock()?.push(record);
        Ok(())
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    type Error = MemoryReporterError;

    async fn post_event(&self, event: &StatusEvent) -> Result<(), Self::Error> {
        self.accept(Posted::Event(event.clone()))
    }

    async fn post_summary(&self, summary: &Summary) -> Result<(), Self::Error> {
        self.accept(Posted::Summary(summary.clone()))
    }
}
