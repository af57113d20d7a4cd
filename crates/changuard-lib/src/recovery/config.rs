use std::time::Duration;

use clap_serde_derive::ClapSerde;

use super::{CircuitBreakerConfig, RetryPolicy};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 60 * 1000;
pub const DEFAULT_MONITORING_PERIOD_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
pub const DEFAULT_MAX_CONCURRENT_RECOVERIES: usize = 3;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30 * 1000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS: u64 = 30;

// Use prefix `recovery-`/`RECOVERY_`
#[derive(ClapSerde, Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive failures (within the monitoring period) that open a breaker.
    #[default(DEFAULT_FAILURE_THRESHOLD)]
    #[arg(
        name = "RECOVERY_FAILURE_THRESHOLD",
        long = "recovery-failure-threshold",
        env,
        help = format!("failures that open a circuit breaker, default is {}", DEFAULT_FAILURE_THRESHOLD)
    )]
    pub failure_threshold: u32,

    #[default(DEFAULT_RECOVERY_TIMEOUT_MS)]
    #[arg(
        name = "RECOVERY_RECOVERY_TIMEOUT_MS",
        long = "recovery-recovery-timeout-ms",
        env,
        help = format!("milliseconds an open breaker waits before letting a trial through, default is {}", DEFAULT_RECOVERY_TIMEOUT_MS)
    )]
    pub recovery_timeout_ms: u64,

    /// Failures older than this window no longer count towards the threshold. 0 disables the window.
    #[default(DEFAULT_MONITORING_PERIOD_MS)]
    #[arg(
        name = "RECOVERY_MONITORING_PERIOD_MS",
        long = "recovery-monitoring-period-ms",
        env,
        help = format!("failure counting window in milliseconds, 0 means unbounded, default is {}", DEFAULT_MONITORING_PERIOD_MS)
    )]
    pub monitoring_period_ms: u64,

    #[default(DEFAULT_SUCCESS_THRESHOLD)]
    #[arg(
        name = "RECOVERY_SUCCESS_THRESHOLD",
        long = "recovery-success-threshold",
        env,
        help = format!("successful trials that close a half-open breaker, default is {}", DEFAULT_SUCCESS_THRESHOLD)
    )]
    pub success_threshold: u32,

    #[default(DEFAULT_MAX_CONCURRENT_RECOVERIES)]
    #[arg(
        name = "RECOVERY_MAX_CONCURRENT_RECOVERIES",
        long = "recovery-max-concurrent-recoveries",
        env,
        help = format!("operations the scheduler runs at the same time, default is {}", DEFAULT_MAX_CONCURRENT_RECOVERIES)
    )]
    pub max_concurrent_recoveries: usize,

    #[default(DEFAULT_MAX_ATTEMPTS)]
    #[arg(
        name = "RECOVERY_MAX_ATTEMPTS",
        long = "recovery-max-attempts",
        env,
        help = format!("attempts before an operation is reported as failed, default is {}", DEFAULT_MAX_ATTEMPTS)
    )]
    pub max_attempts: u32,

    #[default(DEFAULT_BASE_DELAY_MS)]
    #[arg(
        name = "RECOVERY_BASE_DELAY_MS",
        long = "recovery-base-delay-ms",
        env,
        help = format!("first retry delay in milliseconds, default is {}", DEFAULT_BASE_DELAY_MS)
    )]
    pub base_delay_ms: u64,

    #[default(DEFAULT_MAX_DELAY_MS)]
    #[arg(
        name = "RECOVERY_MAX_DELAY_MS",
        long = "recovery-max-delay-ms",
        env,
        help = format!("retry delay cap in milliseconds, default is {}", DEFAULT_MAX_DELAY_MS)
    )]
    pub max_delay_ms: u64,

    #[default(DEFAULT_BACKOFF_FACTOR)]
    #[arg(
        name = "RECOVERY_BACKOFF_FACTOR",
        long = "recovery-backoff-factor",
        env,
        help = format!("multiplier applied to the delay after each attempt, default is {}", DEFAULT_BACKOFF_FACTOR)
    )]
    pub backoff_factor: f64,

    #[default(true)]
    #[arg(
        name = "RECOVERY_JITTER",
        long = "recovery-jitter",
        env,
        help = "randomize retry delays by +/-25%, default is true"
    )]
    pub jitter: bool,

    #[default(DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS)]
    #[arg(
        name = "RECOVERY_HEALTH_CHECK_INTERVAL_SECONDS",
        long = "recovery-health-check-interval-seconds",
        env,
        help = format!("seconds between health_check events, 0 disables them, default is {}", DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS)
    )]
    pub health_check_interval_seconds: u64,
}

impl RecoveryConfig {
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(self.monitoring_period_ms),
            success_threshold: self.success_threshold.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_seconds > 0)
            .then(|| Duration::from_secs(self.health_check_interval_seconds))
    }
}
