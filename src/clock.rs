//! Module that contains the Lamport logical clock.

use crate::LogicalTimestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lamport clock owned by a single process.
///
/// The clock is lock-free and can be advanced from any task without holding the state mutex.
#[derive(Debug, Default)]
pub struct LamportClock(AtomicU64);

impl LamportClock {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Function that advances the clock for a locally originated event and returns the new value.
    pub fn tick(&self) -> LogicalTimestamp {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Function that merges a timestamp carried by a received message.
    ///
    /// The clock becomes `max(local, received) + 1`. Returns the new value.
    pub fn observe(&self, received: LogicalTimestamp) -> LogicalTimestamp {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.max(received) + 1)
            })
            .unwrap_or_else(|current| current);

        previous.max(received) + 1
    }

    pub fn now(&self) -> LogicalTimestamp {
        self.0.load(Ordering::SeqCst)
    }
}
