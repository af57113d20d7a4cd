use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    config::{
        DEFAULT_FAILURE_THRESHOLD, DEFAULT_MONITORING_PERIOD_MS, DEFAULT_RECOVERY_TIMEOUT_MS,
        DEFAULT_SUCCESS_THRESHOLD,
    },
    CircuitOpenError,
};
use crate::{
    events::{EventBus, RecoveryEvent},
    now_timestamp_as_millis_u64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Failures older than this no longer count towards `failure_threshold`.
    /// A zero duration counts failures forever.
    pub monitoring_period: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_millis(DEFAULT_RECOVERY_TIMEOUT_MS),
            monitoring_period: Duration::from_millis(DEFAULT_MONITORING_PERIOD_MS),
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub status: CircuitStatus,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<u64>,
    pub next_attempt_time: Option<u64>,
    /// Start of the current failure counting window.
    pub window_started_at: Option<u64>,
    pub trial_in_flight: bool,
}

impl Default for CircuitBreakerRecord {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            next_attempt_time: None,
            window_started_at: None,
            trial_in_flight: false,
        }
    }
}

/// Failure isolation for one named dependency.
///
/// Clones share the same record, so a breaker can be handed to every task that
/// talks to the dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    record: Arc<Mutex<CircuitBreakerRecord>>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            record: Arc::new(Mutex::new(CircuitBreakerRecord::default())),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn record(&self) -> CircuitBreakerRecord {
        self.lock().clone()
    }

    pub fn status(&self) -> CircuitStatus {
        self.lock().status
    }

    /// Runs `operation` unless the breaker is open.
    ///
    /// A refused call never invokes `operation` and is reported as [`CircuitOpenError`]
    /// converted into the caller's error type.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let permit = self.acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(_) => permit.fail(),
        }
        result
    }

    /// Forces the breaker closed with all counters zeroed.
    pub fn reset(&self) {
        let previous = {
            let mut record = self.lock();
            let previous = record.status;
            *record = CircuitBreakerRecord::default();
            previous
        };
        info!("Circuit breaker {} reset", self.name);
        if previous != CircuitStatus::Closed {
            self.publish(RecoveryEvent::CircuitClosed {
                breaker: self.name.to_string(),
                timestamp: now_timestamp_as_millis_u64(),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: RecoveryEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let now = now_timestamp_as_millis_u64();
        let mut record = self.lock();
        let status = record.status;
        match status {
            CircuitStatus::Closed => Ok(Permit::new(self, false)),
            CircuitStatus::Open => {
                let next_attempt_time = record.next_attempt_time.unwrap_or(now);
                if now < next_attempt_time {
                    debug!(
                        "Circuit breaker {} is open, refusing call until {}",
                        self.name, next_attempt_time
                    );
                    return Err(CircuitOpenError {
                        name: self.name.to_string(),
                        next_attempt_time,
                    });
                }
                record.status = CircuitStatus::HalfOpen;
                record.successes = 0;
                record.trial_in_flight = true;
                drop(record);
                debug!("Circuit breaker {} is half-open, admitting a trial call", self.name);
                self.publish(RecoveryEvent::CircuitHalfOpen {
                    breaker: self.name.to_string(),
                    timestamp: now,
                });
                Ok(Permit::new(self, true))
            }
            CircuitStatus::HalfOpen => {
                if record.trial_in_flight {
                    return Err(CircuitOpenError {
                        name: self.name.to_string(),
                        next_attempt_time: record.next_attempt_time.unwrap_or(now),
                    });
                }
                record.trial_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let now = now_timestamp_as_millis_u64();
        let mut record = self.lock();
        if trial {
            record.trial_in_flight = false;
        }
        record.successes = record.successes.saturating_add(1);
        if record.status == CircuitStatus::HalfOpen
            && record.successes >= self.config.success_threshold
        {
            *record = CircuitBreakerRecord::default();
            drop(record);
            info!("Circuit breaker {} closed", self.name);
            self.publish(RecoveryEvent::CircuitClosed {
                breaker: self.name.to_string(),
                timestamp: now,
            });
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = now_timestamp_as_millis_u64();
        let mut record = self.lock();
        if trial {
            record.trial_in_flight = false;
        }
        if record.status == CircuitStatus::Closed {
            let window = self.config.monitoring_period.as_millis() as u64;
            match record.window_started_at {
                Some(started) if window > 0 && now.saturating_sub(started) > window => {
                    record.failures = 0;
                    record.window_started_at = Some(now);
                }
                None => record.window_started_at = Some(now),
                _ => {}
            }
        }
        record.failures = record.failures.saturating_add(1);
        record.successes = 0;
        record.last_failure_time = Some(now);

        let should_open = record.status == CircuitStatus::HalfOpen
            || (record.status == CircuitStatus::Closed
                && record.failures >= self.config.failure_threshold);
        if !should_open {
            return;
        }
        let next_attempt_time = now.saturating_add(self.config.recovery_timeout.as_millis() as u64);
        record.status = CircuitStatus::Open;
        record.next_attempt_time = Some(next_attempt_time);
        let failures = record.failures;
        drop(record);
        warn!(
            "Circuit breaker {} opened after {} failures, next attempt at {}",
            self.name, failures, next_attempt_time
        );
        self.publish(RecoveryEvent::CircuitOpened {
            breaker: self.name.to_string(),
            failures,
            next_attempt_time,
            timestamp: now,
        });
    }
}

/// Admission ticket for one call. Dropping an unsettled trial frees the half-open slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// Lazily created breakers keyed by operation name.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    events: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, events: Option<EventBus>) -> Self {
        Self {
            config,
            breakers: Default::default(),
            events,
        }
    }

    pub fn get_or_create(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker {}", name);
                let breaker = CircuitBreaker::new(name, self.config.clone());
                match &self.events {
                    Some(events) => breaker.with_events(events.clone()),
                    None => breaker,
                }
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerRecord> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.record()))
            .collect()
    }

    /// Returns false if no breaker with that name has been used yet.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}
