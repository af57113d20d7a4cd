use thiserror::Error;

use crate::{chain::ChainError, transport::TransportError};

/// The breaker refused the call without running it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker {name} is open until {next_attempt_time}")]
pub struct CircuitOpenError {
    pub name: String,
    pub next_attempt_time: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error("Operation {name} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        name: String,
        attempts: u32,
        last_error: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Operation {0} was cancelled")]
    Cancelled(String),
    #[error("Recovery scheduler is not running")]
    SchedulerUnavailable,
    #[error("{0}")]
    Other(String),
}

impl RecoveryError {
    /// Whether running the operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RecoveryError::Cancelled(_) | RecoveryError::SchedulerUnavailable
        )
    }
}

pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;
