//! Failure isolation for every fragile network operation: named circuit breakers,
//! exponential backoff, and a priority queue of recovery operations drained by a
//! bounded worker pool.

mod circuit_breaker;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRecord, CircuitBreakerRegistry,
    CircuitStatus,
};

mod config;
pub use config::RecoveryConfig;

mod error;
pub use error::{CircuitOpenError, RecoveryError, RecoveryResult};

mod retry;
pub use retry::{execute_with_retry, RetryPolicy};

mod scheduler;
pub use scheduler::{
    HealthReport, HealthStatus, OperationId, QueuedOperationInfo, RecoveryFn, RecoveryPriority,
    RecoveryScheduler, RecoverySchedulerActor, RecoverySchedulerArgs, RecoverySchedulerMessage,
    ScheduleRequest, SchedulerStatus,
};

#[cfg(test)]
mod tests;
