use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap, HashMap},
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
};

use futures::{future::BoxFuture, FutureExt};
use ractor::{call, Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    CircuitBreakerRecord, CircuitBreakerRegistry, CircuitStatus, RecoveryConfig, RecoveryError,
    RecoveryResult,
};
use crate::{
    events::{EventBus, RecoveryEvent},
    now_timestamp_as_millis_u64,
};

pub type OperationId = u64;

/// The unit of work the scheduler runs. It is invoked once per attempt.
pub type RecoveryFn = Arc<dyn Fn() -> BoxFuture<'static, RecoveryResult<()>> + Send + Sync>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecoveryPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    /// No breaker is open.
    Healthy,
    /// Some, but not all, breakers are open.
    Degraded,
    /// Every known breaker is open.
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub open_breakers: Vec<String>,
    pub breakers: BTreeMap<String, CircuitBreakerRecord>,
    pub queued: usize,
    pub in_flight: usize,
}

impl HealthReport {
    fn from_breakers(
        breakers: BTreeMap<String, CircuitBreakerRecord>,
        queued: usize,
        in_flight: usize,
    ) -> Self {
        let open_breakers: Vec<String> = breakers
            .iter()
            .filter(|(_, record)| record.status == CircuitStatus::Open)
            .map(|(name, _)| name.clone())
            .collect();
        let status = if open_breakers.is_empty() {
            HealthStatus::Healthy
        } else if open_breakers.len() == breakers.len() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            open_breakers,
            breakers,
            queued,
            in_flight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperationInfo {
    pub id: OperationId,
    pub name: String,
    pub priority: RecoveryPriority,
    pub retry_count: u32,
    pub circuit_breaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Queued operations in dispatch order.
    pub queued: Vec<QueuedOperationInfo>,
    pub in_flight: Vec<OperationId>,
}

pub struct ScheduleRequest {
    pub name: String,
    pub priority: RecoveryPriority,
    pub circuit_breaker: Option<String>,
    pub operation: RecoveryFn,
    completion: Option<oneshot::Sender<RecoveryResult<()>>>,
}

impl ScheduleRequest {
    pub fn new(name: impl Into<String>, priority: RecoveryPriority, operation: RecoveryFn) -> Self {
        Self {
            name: name.into(),
            priority,
            circuit_breaker: None,
            operation,
            completion: None,
        }
    }

    pub fn with_circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    fn with_completion(mut self, completion: oneshot::Sender<RecoveryResult<()>>) -> Self {
        self.completion = Some(completion);
        self
    }
}

struct QueuedOperation {
    id: OperationId,
    seq: u64,
    name: String,
    priority: RecoveryPriority,
    retry_count: u32,
    circuit_breaker: Option<String>,
    operation: RecoveryFn,
    completion: Option<oneshot::Sender<RecoveryResult<()>>>,
}

impl QueuedOperation {
    fn info(&self) -> QueuedOperationInfo {
        QueuedOperationInfo {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            retry_count: self.retry_count,
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }

    fn complete(&mut self, outcome: RecoveryResult<()>) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(outcome);
        }
    }
}

// Higher priority first, then lower sequence number (earlier insertion) first.
impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedOperation {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedOperation {}

#[derive(AsRefStr)]
pub enum RecoverySchedulerMessage {
    Schedule(ScheduleRequest, RpcReplyPort<OperationId>),
    Cancel(OperationId, RpcReplyPort<bool>),
    OperationFinished {
        id: OperationId,
        result: RecoveryResult<()>,
    },
    GetHealth(RpcReplyPort<HealthReport>),
    GetStatus(RpcReplyPort<SchedulerStatus>),
    ResetCircuitBreaker(String, RpcReplyPort<bool>),
    HealthCheck,
}

pub struct RecoverySchedulerArgs {
    pub config: RecoveryConfig,
    pub breakers: CircuitBreakerRegistry,
    pub events: EventBus,
}

pub struct RecoverySchedulerState {
    config: RecoveryConfig,
    breakers: CircuitBreakerRegistry,
    events: EventBus,
    queue: BinaryHeap<QueuedOperation>,
    in_flight: HashMap<OperationId, QueuedOperation>,
    next_id: OperationId,
    next_seq: u64,
    health_check_handle: Option<JoinHandle<()>>,
}

impl RecoverySchedulerState {
    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent_recoveries.max(1)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn enqueue(&mut self, request: ScheduleRequest) -> OperationId {
        self.next_id += 1;
        let id = self.next_id;
        let seq = self.next_seq();
        debug!(
            "Scheduling recovery operation {} ({}) at priority {}",
            id,
            request.name,
            request.priority.as_ref()
        );
        self.queue.push(QueuedOperation {
            id,
            seq,
            name: request.name,
            priority: request.priority,
            retry_count: 0,
            circuit_breaker: request.circuit_breaker,
            operation: request.operation,
            completion: request.completion,
        });
        id
    }

    fn dispatch(&mut self, myself: &ActorRef<RecoverySchedulerMessage>) {
        while self.in_flight.len() < self.max_concurrent() {
            let Some(operation) = self.queue.pop() else {
                break;
            };
            let id = operation.id;
            let attempt = operation.retry_count + 1;
            debug!(
                "Dispatching recovery operation {} ({}), attempt {}",
                id, operation.name, attempt
            );
            self.events.publish(RecoveryEvent::RecoveryStarted {
                operation_id: id,
                name: operation.name.clone(),
                attempt,
                timestamp: now_timestamp_as_millis_u64(),
            });

            let run = operation.operation.clone();
            let breaker = operation
                .circuit_breaker
                .as_deref()
                .map(|name| self.breakers.get_or_create(name));
            self.in_flight.insert(id, operation);

            let myself = myself.clone();
            crate::tasks::spawn(async move {
                let attempt = async move {
                    match breaker {
                        Some(breaker) => breaker.execute(|| run()).await,
                        None => run().await,
                    }
                };
                let result = AssertUnwindSafe(attempt)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(RecoveryError::Other("operation panicked".to_string())));
                // The scheduler may already be stopped.
                let _ = myself.send_message(RecoverySchedulerMessage::OperationFinished { id, result });
            });
        }
    }

    fn on_finished(&mut self, id: OperationId, result: RecoveryResult<()>) {
        let Some(mut operation) = self.in_flight.remove(&id) else {
            warn!("Finished recovery operation {} is not in flight", id);
            return;
        };
        let error = match result {
            Ok(()) => {
                info!(
                    "Recovery operation {} ({}) completed after {} retries",
                    id, operation.name, operation.retry_count
                );
                self.events.publish(RecoveryEvent::RecoveryCompleted {
                    operation_id: id,
                    name: operation.name.clone(),
                    retry_count: operation.retry_count,
                    timestamp: now_timestamp_as_millis_u64(),
                });
                operation.complete(Ok(()));
                return;
            }
            Err(error) => error,
        };

        operation.retry_count += 1;
        if error.is_retryable() && operation.retry_count < self.config.max_attempts {
            warn!(
                "Recovery operation {} ({}) failed on attempt {}: {}, requeued at low priority",
                id, operation.name, operation.retry_count, error
            );
            operation.priority = RecoveryPriority::Low;
            operation.seq = self.next_seq();
            self.queue.push(operation);
            return;
        }

        error!(
            "Recovery operation {} ({}) failed after {} attempts: {}",
            id, operation.name, operation.retry_count, error
        );
        self.events.publish(RecoveryEvent::RecoveryFailed {
            operation_id: id,
            name: operation.name.clone(),
            retry_count: operation.retry_count,
            error: error.to_string(),
            timestamp: now_timestamp_as_millis_u64(),
        });
        let outcome = if error.is_retryable() {
            RecoveryError::RetryExhausted {
                name: operation.name.clone(),
                attempts: operation.retry_count,
                last_error: error.to_string(),
            }
        } else {
            error
        };
        operation.complete(Err(outcome));
    }

    fn cancel(&mut self, id: OperationId) -> bool {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queue)
            .into_vec()
            .into_iter()
            .partition(|operation| operation.id == id);
        self.queue = kept.into();
        let cancelled = !removed.is_empty();
        for mut operation in removed {
            info!("Cancelled recovery operation {} ({})", id, operation.name);
            let name = operation.name.clone();
            operation.complete(Err(RecoveryError::Cancelled(name)));
        }
        cancelled
    }

    fn health(&self) -> HealthReport {
        HealthReport::from_breakers(
            self.breakers.snapshot(),
            self.queue.len(),
            self.in_flight.len(),
        )
    }

    fn status(&self) -> SchedulerStatus {
        let mut queued: Vec<&QueuedOperation> = self.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        let mut in_flight: Vec<OperationId> = self.in_flight.keys().copied().collect();
        in_flight.sort_unstable();
        SchedulerStatus {
            queued: queued.into_iter().map(QueuedOperation::info).collect(),
            in_flight,
        }
    }
}

#[derive(Default)]
pub struct RecoverySchedulerActor;

#[async_trait::async_trait]
impl Actor for RecoverySchedulerActor {
    type Msg = RecoverySchedulerMessage;
    type State = RecoverySchedulerState;
    type Arguments = RecoverySchedulerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let health_check_handle = args
            .config
            .health_check_interval()
            .map(|interval| myself.send_interval(interval, || RecoverySchedulerMessage::HealthCheck));
        Ok(RecoverySchedulerState {
            config: args.config,
            breakers: args.breakers,
            events: args.events,
            queue: BinaryHeap::new(),
            in_flight: HashMap::new(),
            next_id: 0,
            next_seq: 0,
            health_check_handle,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RecoverySchedulerMessage::Schedule(request, reply) => {
                let id = state.enqueue(request);
                let _ = reply.send(id);
                state.dispatch(&myself);
            }
            RecoverySchedulerMessage::Cancel(id, reply) => {
                let _ = reply.send(state.cancel(id));
            }
            RecoverySchedulerMessage::OperationFinished { id, result } => {
                state.on_finished(id, result);
                state.dispatch(&myself);
            }
            RecoverySchedulerMessage::GetHealth(reply) => {
                let _ = reply.send(state.health());
            }
            RecoverySchedulerMessage::GetStatus(reply) => {
                let _ = reply.send(state.status());
            }
            RecoverySchedulerMessage::ResetCircuitBreaker(name, reply) => {
                let _ = reply.send(state.breakers.reset(&name));
            }
            RecoverySchedulerMessage::HealthCheck => {
                let report = state.health();
                debug!("Recovery health check: {:?}", report.status);
                state.events.publish(RecoveryEvent::HealthCheck {
                    status: report.status,
                    open_breakers: report.open_breakers,
                    queued: report.queued,
                    in_flight: report.in_flight,
                    timestamp: now_timestamp_as_millis_u64(),
                });
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.health_check_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Cloneable handle to the scheduler actor.
#[derive(Clone)]
pub struct RecoveryScheduler {
    actor: ActorRef<RecoverySchedulerMessage>,
    breakers: CircuitBreakerRegistry,
    events: EventBus,
}

impl RecoveryScheduler {
    pub async fn start(config: RecoveryConfig, events: EventBus) -> crate::Result<Self> {
        let breakers =
            CircuitBreakerRegistry::new(config.circuit_breaker_config(), Some(events.clone()));
        let (actor, _handle) = Actor::spawn(
            None,
            RecoverySchedulerActor,
            RecoverySchedulerArgs {
                config,
                breakers: breakers.clone(),
                events: events.clone(),
            },
        )
        .await?;
        Ok(Self {
            actor,
            breakers,
            events,
        })
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn submit(&self, request: ScheduleRequest) -> RecoveryResult<OperationId> {
        call!(self.actor, RecoverySchedulerMessage::Schedule, request)
            .map_err(|_| RecoveryError::SchedulerUnavailable)
    }

    pub async fn schedule<F, Fut>(
        &self,
        name: &str,
        priority: RecoveryPriority,
        circuit_breaker: Option<&str>,
        operation: F,
    ) -> RecoveryResult<OperationId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RecoveryResult<()>> + Send + 'static,
    {
        let operation: RecoveryFn = Arc::new(move || operation().boxed());
        self.submit(build_request(name, priority, circuit_breaker, operation))
            .await
    }

    /// Schedules `operation` and waits for its terminal outcome.
    ///
    /// Exhausted retries surface as [`RecoveryError::RetryExhausted`], a cancelled
    /// operation as [`RecoveryError::Cancelled`].
    pub async fn schedule_and_wait<T, F, Fut>(
        &self,
        name: &str,
        priority: RecoveryPriority,
        circuit_breaker: Option<&str>,
        operation: F,
    ) -> RecoveryResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RecoveryResult<T>> + Send + 'static,
    {
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let output = slot.clone();
        let operation = Arc::new(operation);
        let operation: RecoveryFn = Arc::new(move || {
            let operation = operation.clone();
            let output = output.clone();
            async move {
                let value = operation().await?;
                *output.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
                Ok::<(), RecoveryError>(())
            }
            .boxed()
        });

        let (sender, receiver) = oneshot::channel();
        self.submit(
            build_request(name, priority, circuit_breaker, operation).with_completion(sender),
        )
        .await?;
        receiver
            .await
            .map_err(|_| RecoveryError::SchedulerUnavailable)??;

        let value = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        value.ok_or_else(|| RecoveryError::Other(format!("Operation {} produced no output", name)))
    }

    /// Best effort: only operations still waiting in the queue can be cancelled.
    pub async fn cancel(&self, id: OperationId) -> RecoveryResult<bool> {
        call!(self.actor, RecoverySchedulerMessage::Cancel, id)
            .map_err(|_| RecoveryError::SchedulerUnavailable)
    }

    pub async fn health(&self) -> RecoveryResult<HealthReport> {
        call!(self.actor, RecoverySchedulerMessage::GetHealth)
            .map_err(|_| RecoveryError::SchedulerUnavailable)
    }

    pub async fn status(&self) -> RecoveryResult<SchedulerStatus> {
        call!(self.actor, RecoverySchedulerMessage::GetStatus)
            .map_err(|_| RecoveryError::SchedulerUnavailable)
    }

    pub async fn reset_circuit_breaker(&self, name: &str) -> RecoveryResult<bool> {
        call!(
            self.actor,
            RecoverySchedulerMessage::ResetCircuitBreaker,
            name.to_string()
        )
        .map_err(|_| RecoveryError::SchedulerUnavailable)
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

fn build_request(
    name: &str,
    priority: RecoveryPriority,
    circuit_breaker: Option<&str>,
    operation: RecoveryFn,
) -> ScheduleRequest {
    let request = ScheduleRequest::new(name, priority, operation);
    match circuit_breaker {
        Some(breaker) => request.with_circuit_breaker(breaker),
        None => request,
    }
}
