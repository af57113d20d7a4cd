//! Drives imported channel backups through connect, close request and sweep monitoring,
//! one independent state machine per channel.

mod config;
pub use config::{RestoreConfig, DEFAULT_SWEEP_POLL_INTERVAL_MS};

mod context;
pub use context::{
    RestoreContext, RestoreHistoryEntry, RestoreSnapshot, RestoreState, RestoreSummary,
};

mod error;
pub use error::RestoreError;

mod state_machine;
pub use state_machine::{RestoreAction, RestoreEvent, RestoreStateMachine, RestoreTransition};

mod orchestrator;
pub use orchestrator::{
    peer_circuit_breaker, RestoreOrchestrator, RestoreOrchestratorActor, RestoreOrchestratorArgs,
    RestoreOrchestratorMessage, RestoreStepResult, CHAIN_CIRCUIT_BREAKER, RESTORE_PROGRESS_KEY,
};

#[cfg(test)]
mod tests;
