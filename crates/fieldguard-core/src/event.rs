use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

/// Safety decisions announced to collaborators (actuator bridge, dashboard,
/// notifier). Every event is published only after its audit entry is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Approval lifecycle ─────────────────────────────────────
    ApprovalRequested {
        request_id: String,
        action: String,
        reason: String,
    },
    ApprovalGranted {
        request_id: String,
        approved_by: String,
    },
    ApprovalRejected {
        request_id: String,
        rejected_by: String,
    },
    ApprovalExpired {
        request_id: String,
    },
    ApprovalCancelled {
        request_id: String,
    },
    ActionExecuted {
        request_id: String,
        success: bool,
    },

    // ── Jidoka lifecycle ───────────────────────────────────────
    JidokaTriggered {
        event_id: String,
        trigger: String,
        severity: String,
        sensor_id: Option<String>,
    },
    JidokaResolved {
        event_id: String,
        resolved_by: String,
    },
    RollbackGenerated {
        plan_id: String,
        original_action_id: String,
    },

    // ── System ─────────────────────────────────────────────────
    ConfigChanged {
        key: String,
        value: String,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
