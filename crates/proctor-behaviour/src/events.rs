//! Behaviour event system for observability.
//!
//! Emits [`BehaviourEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (audit trails, metrics, regrade tooling) can follow
//! event processing without coupling to the behaviour internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use proctor_types::AttemptState;

/// Events emitted while processing attempt events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BehaviourEvent {
    StepKept {
        attempt_id: Uuid,
        step_id: Uuid,
        event_kind: String,
        state: AttemptState,
    },
    StepDiscarded {
        attempt_id: Uuid,
        step_id: Uuid,
        event_kind: String,
    },
    GradingDispatched {
        attempt_id: Uuid,
        step_id: Uuid,
        state: AttemptState,
    },
    StaleResultDropped {
        attempt_id: Uuid,
        job: Uuid,
    },
    OverrideUpdated {
        usage_id: Uuid,
        slot: u32,
        fraction: f64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<BehaviourEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: BehaviourEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BehaviourEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
