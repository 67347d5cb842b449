//! Single-process publish-subscribe bus (C2).
//!
//! Generalizes the teacher's `EventBus`/`EventEmitter` split: a broadcast
//! channel fans events out to every subscriber in emission order, and a
//! `JsonlLogger` subscriber persists the same stream durably.

use tokio::sync::broadcast;
use tracing::warn;

use super::types::{Event, TimelineEntry};

const DEFAULT_CAPACITY: usize = 10_000;

/// The bus itself. Cheap to clone (wraps a `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimelineEntry>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Register a new subscriber; it sees every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEntry> {
        self.tx.subscribe()
    }

    /// Bind an emitter handle, pre-stamping every emission with `task_id`-free
    /// bookkeeping is left to callers; this just hands back a thin publish handle.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter { tx: self.tx.clone() }
    }
}

/// A cheap-to-clone publish handle. Dropping all subscribers does not stop
/// publishing — `send` on a broadcast channel with no receivers is a no-op
/// error we deliberately ignore, since the JSONL logger subscriber is what
/// actually needs to exist for durability, not live viewers.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<TimelineEntry>,
}

impl EventEmitter {
    pub fn emit(&self, event: Event) {
        let entry = TimelineEntry::new(event);
        if self.tx.send(entry).is_err() {
            warn!("event emitted with no subscribers attached");
        }
    }
}
