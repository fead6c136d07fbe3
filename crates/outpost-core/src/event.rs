//! Queue lifecycle events, recorded into a bounded ring buffer.
//!
//! The admission controller and the tick processor push an event for every
//! status change they make. The [`EventLog`] keeps the newest `capacity`
//! events and counts the ones it had to drop, so an embedding server can
//! poll it without the log growing unbounded.

use std::sync::Mutex;

use serde::Serialize;

use crate::id::{LocationId, OwnerId, QueueItemId};
use crate::queue::{QueueKind, QueueStatus};
use crate::time::Timestamp;

/// A status change of one queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Admitted {
        item: QueueItemId,
        owner: OwnerId,
        location: LocationId,
        kind: QueueKind,
        at: Timestamp,
    },
    Activated {
        item: QueueItemId,
        cost: u64,
        scheduled_completion: Timestamp,
        at: Timestamp,
    },
    Completed {
        item: QueueItemId,
        at: Timestamp,
    },
    Cancelled {
        item: QueueItemId,
        from: QueueStatus,
        refund: Option<u64>,
        at: Timestamp,
    },
    EffectFailed {
        item: QueueItemId,
        reason: String,
        at: Timestamp,
    },
}

impl QueueEvent {
    pub fn item(&self) -> QueueItemId {
        match self {
            QueueEvent::Admitted { item, .. }
            | QueueEvent::Activated { item, .. }
            | QueueEvent::Completed { item, .. }
            | QueueEvent::Cancelled { item, .. }
            | QueueEvent::EffectFailed { item, .. } => *item,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Admitted { .. } => EventKind::Admitted,
            QueueEvent::Activated { .. } => EventKind::Activated,
            QueueEvent::Completed { .. } => EventKind::Completed,
            QueueEvent::Cancelled { .. } => EventKind::Cancelled,
            QueueEvent::EffectFailed { .. } => EventKind::EffectFailed,
        }
    }
}

/// Discriminant tag for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Admitted,
    Activated,
    Completed,
    Cancelled,
    EffectFailed,
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<QueueEvent>>,
    /// Next write position; also the oldest entry once full.
    head: usize,
    len: usize,
    total_written: u64,
}

impl Ring {
    fn push(&mut self, event: QueueEvent) {
        let capacity = self.slots.len();
        self.slots[self.head] = Some(event);
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
        self.total_written += 1;
    }

    fn oldest_first(&self) -> impl Iterator<Item = &QueueEvent> {
        let capacity = self.slots.len();
        let start = if self.len < capacity { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.slots[(start + i) % capacity].as_ref())
    }
}

/// Thread-safe bounded event log. A capacity of 0 is clamped to 1.
#[derive(Debug)]
pub struct EventLog {
    ring: Mutex<Ring>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                total_written: 0,
            }),
        }
    }

    /// Record an event, dropping the oldest one when full. A poisoned log
    /// silently discards the event.
    pub fn push(&self, event: QueueEvent) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.push(event);
        }
    }

    /// All retained events, oldest first.
    pub fn snapshot(&self) -> Vec<QueueEvent> {
        self.ring
            .lock()
            .map(|ring| ring.oldest_first().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained events for one item, oldest first.
    pub fn for_item(&self, item: QueueItemId) -> Vec<QueueEvent> {
        self.ring
            .lock()
            .map(|ring| {
                ring.oldest_first()
                    .filter(|e| e.item() == item)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and return every retained event, oldest first.
    pub fn drain(&self) -> Vec<QueueEvent> {
        let Ok(mut ring) = self.ring.lock() else {
            return Vec::new();
        };
        let events: Vec<QueueEvent> = ring.oldest_first().cloned().collect();
        for slot in &mut ring.slots {
            *slot = None;
        }
        ring.head = 0;
        ring.len = 0;
        events
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().map(|r| r.slots.len()).unwrap_or(0)
    }

    pub fn total_written(&self) -> u64 {
        self.ring.lock().map(|r| r.total_written).unwrap_or(0)
    }

    /// Events lost because the log was full when they arrived.
    pub fn dropped_count(&self) -> u64 {
        self.ring
            .lock()
            .map(|r| r.total_written.saturating_sub(r.slots.len() as u64))
            .unwrap_or(0)
    }
}
