//! Observability events emitted by the recovery engine.
//!
//! Every component publishes into a shared [`EventBus`]. Consumers (a UI, the operator CLI,
//! tests) subscribe and receive their own copy of each event published after subscribing.

use strum::AsRefStr;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    recovery::{HealthStatus, OperationId},
    restore::{RestoreState, RestoreSummary},
    types::Hash256,
};

pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryEvent {
    /// An operation was dispatched to a worker. `attempt` starts at 1.
    RecoveryStarted {
        operation_id: OperationId,
        name: String,
        attempt: u32,
        timestamp: u64,
    },
    RecoveryCompleted {
        operation_id: OperationId,
        name: String,
        retry_count: u32,
        timestamp: u64,
    },
    /// The operation is dropped, either because it exhausted its attempts or because
    /// its error is not retryable.
    RecoveryFailed {
        operation_id: OperationId,
        name: String,
        retry_count: u32,
        error: String,
        timestamp: u64,
    },
    CircuitOpened {
        breaker: String,
        failures: u32,
        next_attempt_time: u64,
        timestamp: u64,
    },
    CircuitHalfOpen {
        breaker: String,
        timestamp: u64,
    },
    CircuitClosed {
        breaker: String,
        timestamp: u64,
    },
    HealthCheck {
        status: HealthStatus,
        open_breakers: Vec<String>,
        queued: usize,
        in_flight: usize,
        timestamp: u64,
    },
    RestoreStateChanged {
        channel_id: Hash256,
        state: RestoreState,
        error: Option<String>,
        timestamp: u64,
    },
    RestoreFinished {
        summary: RestoreSummary,
        timestamp: u64,
    },
}

impl RecoveryEvent {
    /// The wire name of the event, e.g. `recovery_started`.
    pub fn kind(&self) -> &str {
        self.as_ref()
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            RecoveryEvent::RecoveryStarted { timestamp, .. }
            | RecoveryEvent::RecoveryCompleted { timestamp, .. }
            | RecoveryEvent::RecoveryFailed { timestamp, .. }
            | RecoveryEvent::CircuitOpened { timestamp, .. }
            | RecoveryEvent::CircuitHalfOpen { timestamp, .. }
            | RecoveryEvent::CircuitClosed { timestamp, .. }
            | RecoveryEvent::HealthCheck { timestamp, .. }
            | RecoveryEvent::RestoreStateChanged { timestamp, .. }
            | RecoveryEvent::RestoreFinished { timestamp, .. } => *timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RecoveryEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.sender.subscribe()
    }

    /// Publishing without any subscriber is fine, the event is simply dropped.
    pub fn publish(&self, event: RecoveryEvent) {
        trace!("Publishing event {}: {:?}", event.kind(), event);
        let _ = self.sender.send(event);
    }
}
