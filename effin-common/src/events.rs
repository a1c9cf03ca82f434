//! Event types for the EFFIN event system
//!
//! Workers publish alerts and pipeline milestones on the [`EventBus`]; the
//! HTTP layer streams them to dashboards over SSE. Publishing never blocks and
//! never fails a worker: with no subscribers the event is simply dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::Alert;

/// EFFIN event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EffinEvent {
    /// A cross-institution alert was raised
    AlertRaised {
        alert: Alert,
    },

    /// A transaction finished processing (alert or not)
    TransactionProcessed {
        worker: String,
        tx_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A full batch was upserted and queried
    BatchFlushed {
        worker: String,
        size: usize,
        alerts: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch step failed; the batch was dropped
    BatchFailed {
        worker: String,
        stage: String,
        size: usize,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A train call was issued against the shared index
    IndexTrainRequested {
        worker: String,
        succeeded: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EffinEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            EffinEvent::AlertRaised { .. } => "AlertRaised",
            EffinEvent::TransactionProcessed { .. } => "TransactionProcessed",
            EffinEvent::BatchFlushed { .. } => "BatchFlushed",
            EffinEvent::BatchFailed { .. } => "BatchFailed",
            EffinEvent::IndexTrainRequested { .. } => "IndexTrainRequested",
        }
    }
}

/// Broadcast bus for [`EffinEvent`]s
///
/// Slow subscribers lag and lose the oldest events rather than applying
/// backpressure to the pipeline.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EffinEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EffinEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EffinEvent,
    ) -> Result<usize, broadcast::error::SendError<EffinEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone is listening
    pub fn emit_lossy(&self, event: EffinEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
