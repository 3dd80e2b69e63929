//! Bounded, concurrency-safe buffer for collected resource-span groups.
//!
//! The buffer is the single resource shared between the ingestion listener and
//! the lifecycle-driven flush loop. Both operations run under one mutex held
//! only for the in-memory list manipulation, never across network I/O, so
//! ingestion throughput is never coupled to flush duration.

use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default maximum number of resource-span groups held in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Error returned when an append would exceed the buffer capacity.
///
/// The whole append is rejected; the buffer is left unchanged so the sender
/// can retry or report cleanly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("span buffer at capacity: {held} held + {incoming} incoming exceeds {capacity}")]
pub struct CapacityExceeded {
    /// Configured capacity of the buffer.
    pub capacity: usize,
    /// Number of groups held at the time of the rejected append.
    pub held: usize,
    /// Number of groups the rejected append carried.
    pub incoming: usize,
}

/// Ordered, bounded holding area for [`ResourceSpans`] groups.
///
/// Groups are opaque pass-through data: never inspected or mutated, no
/// deduplication. Insertion order is preserved within a flush cycle but
/// carries no meaning across cycles.
#[derive(Debug)]
pub struct SpanBuffer {
    spans: Mutex<Vec<ResourceSpans>>,
    capacity: usize,
}

impl SpanBuffer {
    /// Creates a buffer that holds at most `capacity` groups.
    pub fn new(capacity: usize) -> Self {
        Self {
            spans: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Atomically appends all given groups, or none.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when the current length plus the incoming
    /// count would exceed the capacity. Nothing is inserted in that case.
    pub fn append(&self, units: Vec<ResourceSpans>) -> Result<(), CapacityExceeded> {
        let mut spans = self.lock();
        if spans.len() + units.len() > self.capacity {
            return Err(CapacityExceeded {
                capacity: self.capacity,
                held: spans.len(),
                incoming: units.len(),
            });
        }
        spans.extend(units);
        Ok(())
    }

    /// Atomically takes the entire contents and resets the buffer to empty.
    ///
    /// Any group appended before this call's critical section is included;
    /// any group appended after is retained for the next cycle. No group is
    /// ever returned by two drains or lost between them.
    pub fn drain_all(&self) -> Vec<ResourceSpans> {
        std::mem::take(&mut *self.lock())
    }

    /// Returns the number of groups currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResourceSpans>> {
        // Every critical section is a single Vec operation, so a poisoned
        // guard still holds a structurally valid Vec.
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SpanBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
