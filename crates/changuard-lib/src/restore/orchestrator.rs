use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use bitcoin::Txid;
use ractor::{call, Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use tracing::{debug, error, info, warn};

use super::{
    RestoreAction, RestoreConfig, RestoreContext, RestoreError, RestoreEvent,
    RestoreHistoryEntry, RestoreSnapshot, RestoreState, RestoreStateMachine, RestoreSummary,
};
use crate::{
    backup::{ChannelBackupCodec, ChannelBackupRecord, EncryptedBackupBlob},
    chain::{SweepStatus, SweepWatcher},
    events::{EventBus, RecoveryEvent},
    now_timestamp_as_millis_u64,
    recovery::{RecoveryError, RecoveryPriority, RecoveryScheduler},
    storage::SecureStorage,
    transport::PeerTransport,
    types::Hash256,
};

pub const RESTORE_PROGRESS_KEY: &str = "restore_progress";
/// Breaker guarding every chain query made while restoring.
pub const CHAIN_CIRCUIT_BREAKER: &str = "chain";

pub fn peer_circuit_breaker(record: &ChannelBackupRecord) -> String {
    format!("peer:{}", record.node_id)
}

/// Outcome of one restore step, reported back to the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStepResult {
    Connected,
    CloseRequested(Txid),
    Sweep(SweepStatus),
}

#[derive(AsRefStr)]
pub enum RestoreOrchestratorMessage {
    StartRestore(
        Vec<ChannelBackupRecord>,
        RpcReplyPort<Result<RestoreSummary, RestoreError>>,
    ),
    RetryFailed(RpcReplyPort<Result<Vec<Hash256>, RestoreError>>),
    StepFinished {
        channel_id: Hash256,
        attempt: u32,
        result: Result<RestoreStepResult, RecoveryError>,
    },
    PollSweep {
        channel_id: Hash256,
        attempt: u32,
    },
    GetSummary(RpcReplyPort<RestoreSummary>),
    GetSnapshot(RpcReplyPort<RestoreSnapshot>),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RestoreProgress {
    contexts: Vec<RestoreContext>,
    history: Vec<RestoreHistoryEntry>,
}

pub struct RestoreOrchestratorArgs {
    pub config: RestoreConfig,
    pub scheduler: RecoveryScheduler,
    pub transport: Arc<dyn PeerTransport>,
    pub sweep_watcher: Arc<dyn SweepWatcher>,
    pub storage: Arc<dyn SecureStorage>,
    pub events: EventBus,
}

pub struct RestoreOrchestratorState {
    config: RestoreConfig,
    scheduler: RecoveryScheduler,
    transport: Arc<dyn PeerTransport>,
    sweep_watcher: Arc<dyn SweepWatcher>,
    storage: Arc<dyn SecureStorage>,
    events: EventBus,
    contexts: BTreeMap<Hash256, RestoreContext>,
    history: Vec<RestoreHistoryEntry>,
    finish_reported: bool,
}

impl RestoreOrchestratorState {
    fn summary(&self) -> RestoreSummary {
        RestoreSummary::from_contexts(self.contexts.values())
    }

    fn snapshot(&self) -> RestoreSnapshot {
        RestoreSnapshot {
            contexts: self.contexts.values().cloned().collect(),
            summary: self.summary(),
            history: self.history.clone(),
        }
    }

    fn load_progress(&mut self) {
        let bytes = match self.storage.get(RESTORE_PROGRESS_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(err) => {
                error!("Failed to load restore progress: {}", err);
                return;
            }
        };
        match serde_json::from_slice::<RestoreProgress>(&bytes) {
            Ok(progress) => {
                self.contexts = progress
                    .contexts
                    .into_iter()
                    .map(|context| (context.channel_id(), context))
                    .collect();
                self.history = progress.history;
                info!(
                    "Loaded restore progress of {} channels",
                    self.contexts.len()
                );
            }
            Err(err) => error!("Discarding unreadable restore progress: {}", err),
        }
    }

    fn persist(&self) {
        let progress = RestoreProgress {
            contexts: self.contexts.values().cloned().collect(),
            history: self.history.clone(),
        };
        let result = serde_json::to_vec(&progress)
            .map_err(|err| err.to_string())
            .and_then(|bytes| {
                self.storage
                    .set(RESTORE_PROGRESS_KEY, &bytes)
                    .map_err(|err| err.to_string())
            });
        if let Err(err) = result {
            error!("Failed to persist restore progress: {}", err);
        }
    }

    /// Applies `event` to a context, records the result and starts the entered step.
    fn transition(
        &mut self,
        myself: &ActorRef<RestoreOrchestratorMessage>,
        channel_id: Hash256,
        event: RestoreEvent,
    ) -> Result<(), RestoreError> {
        let context = self
            .contexts
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| RestoreError::Internal(format!("unknown channel {}", channel_id)))?;
        let transition = RestoreStateMachine::apply(context, event)?;
        if !transition.dirty {
            return Ok(());
        }
        let context = transition.context;
        match context.state {
            RestoreState::Failed => warn!(
                "Restore of channel {} failed: {}",
                channel_id,
                context.error.as_deref().unwrap_or("unknown error")
            ),
            state => info!("Restore of channel {} entered {:?}", channel_id, state),
        }
        if context.state.is_terminal() {
            self.history.push(RestoreHistoryEntry::from(&context));
        }
        self.events.publish(RecoveryEvent::RestoreStateChanged {
            channel_id,
            state: context.state,
            error: context.error.clone(),
            timestamp: context.updated_at,
        });
        for action in transition.actions {
            self.run_action(myself, &context, action);
        }
        self.contexts.insert(channel_id, context);
        Ok(())
    }

    fn run_action(
        &self,
        myself: &ActorRef<RestoreOrchestratorMessage>,
        context: &RestoreContext,
        action: RestoreAction,
    ) {
        let channel_id = context.channel_id();
        let attempt = context.attempt;
        let scheduler = self.scheduler.clone();
        let myself = myself.clone();
        debug!("Running {:?} for channel {}", action, channel_id);

        match action {
            RestoreAction::ConnectPeer => {
                let transport = self.transport.clone();
                let peer = context.backup.peer_address();
                let breaker = peer_circuit_breaker(&context.backup);
                crate::tasks::spawn(async move {
                    let result = scheduler
                        .schedule_and_wait(
                            &format!("connect:{}", channel_id),
                            RecoveryPriority::High,
                            Some(breaker.as_str()),
                            move || {
                                let transport = transport.clone();
                                let peer = peer.clone();
                                async move {
                                    Ok::<_, RecoveryError>(transport.connect(&peer).await?)
                                }
                            },
                        )
                        .await
                        .map(|_| RestoreStepResult::Connected);
                    report(&myself, channel_id, attempt, result);
                });
            }
            RestoreAction::RequestClose => {
                let transport = self.transport.clone();
                let breaker = peer_circuit_breaker(&context.backup);
                crate::tasks::spawn(async move {
                    let result = scheduler
                        .schedule_and_wait(
                            &format!("close:{}", channel_id),
                            RecoveryPriority::High,
                            Some(breaker.as_str()),
                            move || {
                                let transport = transport.clone();
                                async move {
                                    Ok::<_, RecoveryError>(transport.request_close(&channel_id).await?)
                                }
                            },
                        )
                        .await
                        .map(RestoreStepResult::CloseRequested);
                    report(&myself, channel_id, attempt, result);
                });
            }
            RestoreAction::AwaitSweep => {
                let Some(closing_txid) = context.closing_txid else {
                    report(
                        &myself,
                        channel_id,
                        attempt,
                        Err(RecoveryError::Other(
                            "no closing transaction to monitor".to_string(),
                        )),
                    );
                    return;
                };
                let watcher = self.sweep_watcher.clone();
                crate::tasks::spawn(async move {
                    let result = scheduler
                        .schedule_and_wait(
                            &format!("sweep:{}", channel_id),
                            RecoveryPriority::Medium,
                            Some(CHAIN_CIRCUIT_BREAKER),
                            move || {
                                let watcher = watcher.clone();
                                async move {
                                    Ok::<_, RecoveryError>(
                                        watcher.sweep_status(&channel_id, &closing_txid).await?,
                                    )
                                }
                            },
                        )
                        .await
                        .map(RestoreStepResult::Sweep);
                    report(&myself, channel_id, attempt, result);
                });
            }
        }
    }

    fn on_step_finished(
        &mut self,
        myself: &ActorRef<RestoreOrchestratorMessage>,
        channel_id: Hash256,
        attempt: u32,
        result: Result<RestoreStepResult, RecoveryError>,
    ) -> Result<(), RestoreError> {
        let Some(context) = self.contexts.get(&channel_id) else {
            debug!("Dropping step result for unknown channel {}", channel_id);
            return Ok(());
        };
        if context.attempt != attempt || context.state.is_terminal() {
            debug!(
                "Dropping stale step result for channel {} (attempt {})",
                channel_id, attempt
            );
            return Ok(());
        }

        let event = match (context.state, result) {
            (_, Err(err)) => RestoreEvent::StepFailed {
                reason: err.to_string(),
            },
            (RestoreState::Connecting, Ok(RestoreStepResult::Connected)) => {
                RestoreEvent::PeerConnected
            }
            (RestoreState::RequestingClose, Ok(RestoreStepResult::CloseRequested(closing_txid))) => {
                RestoreEvent::CloseRequested { closing_txid }
            }
            (RestoreState::Monitoring, Ok(RestoreStepResult::Sweep(SweepStatus::Swept))) => {
                RestoreEvent::Swept
            }
            (RestoreState::Monitoring, Ok(RestoreStepResult::Sweep(status))) => {
                debug!(
                    "Channel {} not swept yet ({:?}), polling again",
                    channel_id, status
                );
                myself.send_after(self.config.sweep_poll_interval(), move || {
                    RestoreOrchestratorMessage::PollSweep {
                        channel_id,
                        attempt,
                    }
                });
                return Ok(());
            }
            (state, Ok(result)) => {
                warn!(
                    "Ignoring step result {:?} for channel {} in state {:?}",
                    result, channel_id, state
                );
                return Ok(());
            }
        };
        self.transition(myself, channel_id, event)?;
        self.persist();
        self.report_finished_if_done();
        Ok(())
    }

    fn report_finished_if_done(&mut self) {
        let summary = self.summary();
        if !summary.is_complete() || self.finish_reported {
            return;
        }
        self.finish_reported = true;
        if summary.is_partial_success() {
            warn!(
                "Restore finished with partial success: {} completed, {} failed",
                summary.completed_channels, summary.failed_channels
            );
        } else {
            info!(
                "Restore finished: {} completed, {} failed",
                summary.completed_channels, summary.failed_channels
            );
        }
        self.events.publish(RecoveryEvent::RestoreFinished {
            summary,
            timestamp: now_timestamp_as_millis_u64(),
        });
    }

    fn start_restore(
        &mut self,
        myself: &ActorRef<RestoreOrchestratorMessage>,
        records: Vec<ChannelBackupRecord>,
    ) -> Result<RestoreSummary, RestoreError> {
        if records.is_empty() {
            return Err(RestoreError::NoChannels);
        }
        if self.summary().pending_channels > 0 {
            return Err(RestoreError::RestoreInProgress);
        }
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.channel_id) {
                return Err(RestoreError::DuplicateChannel(record.channel_id));
            }
        }

        info!("Starting restore of {} channels", records.len());
        self.contexts = records
            .into_iter()
            .map(|record| (record.channel_id, RestoreContext::new(record)))
            .collect();
        self.finish_reported = false;
        let channel_ids: Vec<Hash256> = self.contexts.keys().copied().collect();
        for channel_id in channel_ids {
            self.transition(myself, channel_id, RestoreEvent::Start)?;
        }
        self.persist();
        Ok(self.summary())
    }

    fn retry_failed(
        &mut self,
        myself: &ActorRef<RestoreOrchestratorMessage>,
    ) -> Result<Vec<Hash256>, RestoreError> {
        let failed: Vec<Hash256> = self
            .contexts
            .values()
            .filter(|context| context.state == RestoreState::Failed)
            .map(RestoreContext::channel_id)
            .collect();
        if failed.is_empty() {
            return Ok(failed);
        }
        info!("Retrying restore of {} failed channels", failed.len());
        self.finish_reported = false;
        for channel_id in &failed {
            self.transition(myself, *channel_id, RestoreEvent::Retry)?;
            self.transition(myself, *channel_id, RestoreEvent::Start)?;
        }
        self.persist();
        Ok(failed)
    }

    /// Picks up contexts that were mid-flight when the process stopped.
    fn resume(&mut self, myself: &ActorRef<RestoreOrchestratorMessage>) {
        let in_progress: Vec<RestoreContext> = self
            .contexts
            .values()
            .filter(|context| !context.state.is_terminal())
            .cloned()
            .collect();
        if in_progress.is_empty() {
            self.finish_reported = true;
            return;
        }
        info!("Resuming restore of {} channels", in_progress.len());
        for context in in_progress {
            if context.state == RestoreState::Pending {
                if let Err(err) = self.transition(myself, context.channel_id(), RestoreEvent::Start) {
                    error!("Failed to resume channel {}: {}", context.channel_id(), err);
                }
                continue;
            }
            for action in RestoreStateMachine::on_entering(&context) {
                self.run_action(myself, &context, action);
            }
        }
        self.persist();
    }
}

fn report(
    myself: &ActorRef<RestoreOrchestratorMessage>,
    channel_id: Hash256,
    attempt: u32,
    result: Result<RestoreStepResult, RecoveryError>,
) {
    // The orchestrator may have been stopped while the step ran.
    let _ = myself.send_message(RestoreOrchestratorMessage::StepFinished {
        channel_id,
        attempt,
        result,
    });
}

#[derive(Default)]
pub struct RestoreOrchestratorActor;

#[async_trait::async_trait]
impl Actor for RestoreOrchestratorActor {
    type Msg = RestoreOrchestratorMessage;
    type State = RestoreOrchestratorState;
    type Arguments = RestoreOrchestratorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut state = RestoreOrchestratorState {
            config: args.config,
            scheduler: args.scheduler,
            transport: args.transport,
            sweep_watcher: args.sweep_watcher,
            storage: args.storage,
            events: args.events,
            contexts: BTreeMap::new(),
            history: Vec::new(),
            finish_reported: false,
        };
        state.load_progress();
        Ok(state)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.resume(&myself);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RestoreOrchestratorMessage::StartRestore(records, reply) => {
                let _ = reply.send(state.start_restore(&myself, records));
            }
            RestoreOrchestratorMessage::RetryFailed(reply) => {
                let _ = reply.send(state.retry_failed(&myself));
            }
            RestoreOrchestratorMessage::StepFinished {
                channel_id,
                attempt,
                result,
            } => {
                if let Err(err) = state.on_step_finished(&myself, channel_id, attempt, result) {
                    error!("Failed to apply restore step for {}: {}", channel_id, err);
                }
            }
            RestoreOrchestratorMessage::PollSweep {
                channel_id,
                attempt,
            } => {
                if let Some(context) = state.contexts.get(&channel_id) {
                    if context.attempt == attempt && context.state == RestoreState::Monitoring {
                        let context = context.clone();
                        state.run_action(&myself, &context, RestoreAction::AwaitSweep);
                    }
                }
            }
            RestoreOrchestratorMessage::GetSummary(reply) => {
                let _ = reply.send(state.summary());
            }
            RestoreOrchestratorMessage::GetSnapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
        }
        Ok(())
    }
}

/// Cloneable handle to the restore orchestrator actor.
#[derive(Clone)]
pub struct RestoreOrchestrator {
    actor: ActorRef<RestoreOrchestratorMessage>,
}

impl RestoreOrchestrator {
    /// Starts the orchestrator, resuming any restore persisted in `args.storage`.
    pub async fn start(args: RestoreOrchestratorArgs) -> crate::Result<Self> {
        let (actor, _handle) = Actor::spawn(None, RestoreOrchestratorActor, args).await?;
        Ok(Self { actor })
    }

    pub async fn start_restore(
        &self,
        records: Vec<ChannelBackupRecord>,
    ) -> Result<RestoreSummary, RestoreError> {
        call!(self.actor, RestoreOrchestratorMessage::StartRestore, records)
            .map_err(|_| RestoreError::OrchestratorUnavailable)?
    }

    /// Decrypts `blob` and restores its channels. A bad password or blob creates no contexts.
    pub async fn restore_from_backup(
        &self,
        codec: &ChannelBackupCodec,
        blob: &EncryptedBackupBlob,
        password: &str,
    ) -> Result<RestoreSummary, RestoreError> {
        let (codec, blob, password) = (codec.clone(), blob.clone(), password.to_string());
        let records = tokio::task::spawn_blocking(move || codec.import(&blob, &password))
            .await
            .map_err(|err| RestoreError::Internal(err.to_string()))??;
        self.start_restore(records).await
    }

    /// Restarts only the `FAILED` channels. Returns their ids.
    pub async fn retry_failed(&self) -> Result<Vec<Hash256>, RestoreError> {
        call!(self.actor, RestoreOrchestratorMessage::RetryFailed)
            .map_err(|_| RestoreError::OrchestratorUnavailable)?
    }

    pub async fn summary(&self) -> Result<RestoreSummary, RestoreError> {
        call!(self.actor, RestoreOrchestratorMessage::GetSummary)
            .map_err(|_| RestoreError::OrchestratorUnavailable)
    }

    pub async fn snapshot(&self) -> Result<RestoreSnapshot, RestoreError> {
        call!(self.actor, RestoreOrchestratorMessage::GetSnapshot)
            .map_err(|_| RestoreError::OrchestratorUnavailable)
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}
