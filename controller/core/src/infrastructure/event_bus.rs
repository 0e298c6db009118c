// Event Bus Implementation - Pub/Sub for Fleet and Run Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Fleet-wide events (status transitions, run/update completions, agent
// removals) go over a single shared channel; per-run output uses an owned
// channel per run id, created on first use and evicted when the run closes.
//
// Delivery is best-effort, at-most-once: a lagging subscriber drops events,
// it never blocks publication to others.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{FleetEvent, RunOutputChunk};
use crate::domain::run::RunId;

/// Fleet-wide pub/sub for dashboard observers.
#[derive(Clone)]
pub struct FleetEventBus {
    sender: Arc<broadcast::Sender<FleetEvent>>,
}

impl FleetEventBus {
    /// Create a new bus; `capacity` bounds how many events may buffer per
    /// subscriber before old ones drop.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: FleetEvent) {
        debug!("Publishing fleet event: {:?}", event);
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to fleet events");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FleetEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Per-run output fan-out.
///
/// The subscriber set is an explicit owned map keyed by run id; `close`
/// evicts the entry once the run reaches a terminal state, so the map only
/// ever holds in-flight runs.
#[derive(Clone)]
pub struct RunStreamBus {
    channels: Arc<DashMap<RunId, broadcast::Sender<RunOutputChunk>>>,
    capacity: usize,
}

impl RunStreamBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Attach to a run's live output from this moment forward. Backfill is
    /// the caller's job via the persisted run log.
    pub fn subscribe(&self, run_id: RunId) -> broadcast::Receiver<RunOutputChunk> {
        self.channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish one fragment to the run's attached observers, if any.
    pub fn publish(&self, chunk: RunOutputChunk) {
        if let Some(sender) = self.channels.get(&chunk.run_id) {
            if sender.send(chunk).is_err() {
                debug!("No live subscribers for run output");
            }
        }
    }

    /// Drop the run's channel. Pending receivers observe end-of-stream.
    pub fn close(&self, run_id: RunId) {
        if self.channels.remove(&run_id).is_some() {
            debug!("Closed run output channel for {}", run_id);
        }
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

impl Default for RunStreamBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain helper used by SSE endpoints and tests: receive until closed,
/// logging lag instead of failing.
pub async fn recv_logging_lag<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match receiver.recv().await {
            Ok(item) => return Some(item),
            Err(broadcast::error::RecvError::Closed) => return None,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event receiver lagged by {} events", n);
            }
        }
    }
}
