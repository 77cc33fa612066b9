use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorCategory;
use crate::model::Provider;

/// Observable state changes of the sync core.
/// The CLI logs them; a desktop shell can subscribe and render them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    CredentialRefreshed {
        user: String,
        provider: Provider,
        expires_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    CycleStarted {
        user: String,
        cycle_id: String,
        at: DateTime<Utc>,
    },
    /// A provider was skipped for this cycle.
    ProviderDegraded {
        user: String,
        provider: Provider,
        category: ErrorCategory,
        at: DateTime<Utc>,
    },
    OperationFailed {
        user: String,
        operation: String,
        attempts: u32,
        category: ErrorCategory,
        at: DateTime<Utc>,
    },
    CycleCompleted {
        user: String,
        cycle_id: String,
        applied: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
    CycleFailed {
        user: String,
        cycle_id: String,
        category: ErrorCategory,
        at: DateTime<Utc>,
    },
}

const EVENT_CAPACITY: usize = 256;

/// Fan-out publisher. Sending never blocks and never fails when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // Err only means there are no receivers.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
