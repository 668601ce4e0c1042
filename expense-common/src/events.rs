//! Observation events
//!
//! Broadcast notifications about what the pipeline did to a Record. These are
//! for observers (logs, HTTP clients, tests); the pipeline's own work queue is
//! separate and never reads from here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Status;

/// Pipeline notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExpenseEvent {
    /// Upload accepted and Record persisted as pending
    RecordCreated {
        record_id: Uuid,
        filename: String,
        timestamp: DateTime<Utc>,
    },

    /// Consumer handed an event to its stage handler
    StageDispatched {
        record_id: Uuid,
        /// Event kind as submitted (`new`, `processed`, ... or an unknown kind)
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// Persisted status changed
    StatusChanged {
        record_id: Uuid,
        old_status: Status,
        new_status: Status,
        timestamp: DateTime<Utc>,
    },

    /// Handler lost the single-writer check and did not write
    StaleEventDropped {
        record_id: Uuid,
        kind: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment step skipped (precondition unmet or lookup failed)
    PostProcessorSkipped {
        record_id: Uuid,
        post_processor: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExpenseEvent {
    pub fn record_id(&self) -> Uuid {
        match self {
            ExpenseEvent::RecordCreated { record_id, .. }
            | ExpenseEvent::StageDispatched { record_id, .. }
            | ExpenseEvent::StatusChanged { record_id, .. }
            | ExpenseEvent::StaleEventDropped { record_id, .. }
            | ExpenseEvent::PostProcessorSkipped { record_id, .. } => *record_id,
        }
    }
}

/// Broadcast bus for [`ExpenseEvent`]s
///
/// Cloning is cheap; all clones share one channel. Receivers that fall more
/// than `capacity` events behind miss the oldest ones.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExpenseEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExpenseEvent> {
        self.tx.subscribe()
    }

    /// Emit to all subscribers; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ExpenseEvent,
    ) -> Result<usize, broadcast::error::SendError<ExpenseEvent>> {
        self.tx.send(event)
    }

    /// Emit, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: ExpenseEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
