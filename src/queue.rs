use crossbeam_queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PipelineError, Result};
use crate::reading::Reading;

enum Slots {
    Unbounded(SegQueue<Reading>),
    Bounded(ArrayQueue<Reading>),
}

/// Lock-free FIFO decoupling one sensor producer from the aggregator.
/// Any number of producers may enqueue; exactly one consumer drains it.
pub struct SensorQueue {
    source_id: String,
    slots: Slots,
    enqueued: AtomicU64,
    rejected: AtomicU64,
}

impl SensorQueue {
    pub fn unbounded(source_id: impl Into<String>) -> Self {
        Self::with_slots(source_id.into(), Slots::Unbounded(SegQueue::new()))
    }

    /// A queue that refuses new readings once `capacity` are pending.
    /// A zero capacity is raised to one.
    pub fn bounded(source_id: impl Into<String>, capacity: usize) -> Self {
        Self::with_slots(source_id.into(), Slots::Bounded(ArrayQueue::new(capacity.max(1))))
    }

    fn with_slots(source_id: String, slots: Slots) -> Self {
        Self {
            source_id,
            slots,
            enqueued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Append a reading. Never blocks; a full bounded queue hands the reading
    /// back inside `QueueFull` and the caller decides what to do with it.
    pub fn enqueue(&self, reading: Reading) -> Result<()> {
        match &self.slots {
            Slots::Unbounded(queue) => queue.push(reading),
            Slots::Bounded(queue) => {
                if let Err(reading) = queue.push(reading) {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(PipelineError::QueueFull {
                        source_id: self.source_id.clone(),
                        capacity: queue.capacity(),
                        reading: Box::new(reading),
                    });
                }
            }
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Oldest pending reading, or `None` right away if there is none
    pub fn try_dequeue(&self) -> Option<Reading> {
        match &self.slots {
            Slots::Unbounded(queue) => queue.pop(),
            Slots::Bounded(queue) => queue.pop(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Unbounded(queue) => queue.len(),
            Slots::Bounded(queue) => queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        match &self.slots {
            Slots::Unbounded(_) => None,
            Slots::Bounded(queue) => Some(queue.capacity()),
        }
    }

    pub fn get_stats(&self) -> QueueStats {
        QueueStats {
            source_id: self.source_id.clone(),
            depth: self.len(),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub source_id: String,
    pub depth: usize,
    pub enqueued: u64,
    pub rejected: u64,
}
