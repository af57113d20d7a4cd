use std::{collections::HashMap, sync::Arc};

use bitcoin::Txid;
use ractor::{call, Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use strum::AsRefStr;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    state::sort_by_urgency, HtlcId, HtlcInfo, HtlcMonitorConfig, HtlcMonitorError,
    HtlcMonitorSnapshot, HtlcMonitorState, MonitoredHtlc,
};
use crate::{chain::BlockHeightSource, now_timestamp_as_millis_u64, types::Hash256};

/// Lifecycle updates reported by the channel layer or the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtlcStateUpdate {
    Onchain,
    Published(Txid),
    /// Resolution removes the HTLC from the tracked set.
    Resolved,
    Error(String),
}

impl HtlcStateUpdate {
    fn target(&self) -> HtlcMonitorState {
        match self {
            HtlcStateUpdate::Onchain => HtlcMonitorState::Onchain,
            HtlcStateUpdate::Published(_) => HtlcMonitorState::HtlcTxPublished,
            HtlcStateUpdate::Resolved => HtlcMonitorState::Resolved,
            HtlcStateUpdate::Error(_) => HtlcMonitorState::Error,
        }
    }
}

#[derive(AsRefStr)]
pub enum HtlcMonitorMessage {
    AddHtlc(HtlcInfo, RpcReplyPort<Result<MonitoredHtlc, HtlcMonitorError>>),
    RemoveHtlc(HtlcId, RpcReplyPort<Option<MonitoredHtlc>>),
    /// Payment hash and preimage. Replies with the number of tracked HTLCs updated.
    RegisterPreimage(Hash256, Hash256, RpcReplyPort<Result<usize, HtlcMonitorError>>),
    UpdateState(
        HtlcId,
        HtlcStateUpdate,
        RpcReplyPort<Result<(), HtlcMonitorError>>,
    ),
    CheckNow(Option<RpcReplyPort<HtlcMonitorSnapshot>>),
    StartMonitoring(RpcReplyPort<bool>),
    StopMonitoring(RpcReplyPort<bool>),
    GetSnapshot(RpcReplyPort<HtlcMonitorSnapshot>),
}

pub struct HtlcMonitorActor {
    height_source: Arc<dyn BlockHeightSource>,
}

impl HtlcMonitorActor {
    pub fn new(height_source: Arc<dyn BlockHeightSource>) -> Self {
        Self { height_source }
    }
}

pub struct HtlcMonitorActorState {
    config: HtlcMonitorConfig,
    htlcs: HashMap<HtlcId, MonitoredHtlc>,
    /// Verified preimages by payment hash, kept for HTLCs added later.
    preimages: HashMap<Hash256, Hash256>,
    current_height: Option<u64>,
    last_error: Option<String>,
    last_check_at: Option<u64>,
    monitoring_handle: Option<JoinHandle<()>>,
}

impl HtlcMonitorActorState {
    fn new(config: HtlcMonitorConfig) -> Self {
        Self {
            config,
            htlcs: HashMap::new(),
            preimages: HashMap::new(),
            current_height: None,
            last_error: None,
            last_check_at: None,
            monitoring_handle: None,
        }
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn snapshot(&self) -> HtlcMonitorSnapshot {
        let mut htlcs: Vec<MonitoredHtlc> = self.htlcs.values().cloned().collect();
        sort_by_urgency(&mut htlcs);
        HtlcMonitorSnapshot {
            current_height: self.current_height,
            last_error: self.last_error.clone(),
            last_check_at: self.last_check_at,
            monitoring: self.is_monitoring(),
            htlcs,
        }
    }

    /// Heights only move forward. A stale height from a lagging backend is ignored.
    fn apply_height(&mut self, height: u64) {
        match self.current_height {
            Some(current) if height < current => {
                debug!(
                    "Ignoring chain height {} lower than current height {}",
                    height, current
                );
            }
            _ => self.current_height = Some(height),
        }
    }

    fn recompute(&mut self) {
        let height = self.current_height;
        let margin = self.config.safety_margin_blocks;
        for htlc in self.htlcs.values_mut() {
            let previous = htlc.state;
            htlc.refresh(height, margin);
            if previous != htlc.state {
                warn!(
                    "HTLC {} expired at height {:?} (cltv expiry {})",
                    htlc.id, height, htlc.cltv_expiry
                );
            }
        }
    }

    fn register_preimage(
        &mut self,
        payment_hash: Hash256,
        preimage: Hash256,
    ) -> Result<usize, HtlcMonitorError> {
        if Hash256::sha256(preimage.as_ref()) != payment_hash {
            return Err(HtlcMonitorError::PreimageMismatch(payment_hash));
        }
        self.preimages.insert(payment_hash, preimage);
        let height = self.current_height;
        let margin = self.config.safety_margin_blocks;
        let mut updated = 0;
        for htlc in self
            .htlcs
            .values_mut()
            .filter(|htlc| htlc.payment_hash == payment_hash)
        {
            htlc.preimage = Some(preimage);
            htlc.refresh(height, margin);
            updated += 1;
        }
        debug!(
            "Registered preimage for payment hash {}, {} HTLCs updated",
            payment_hash, updated
        );
        Ok(updated)
    }

    fn update_state(
        &mut self,
        id: HtlcId,
        update: HtlcStateUpdate,
    ) -> Result<(), HtlcMonitorError> {
        let htlc = self
            .htlcs
            .get_mut(&id)
            .ok_or(HtlcMonitorError::HtlcNotFound(id))?;
        let next = update.target();
        if !htlc.state.can_transition_to(next) {
            return Err(HtlcMonitorError::InvalidTransition {
                id,
                from: htlc.state,
                to: next,
            });
        }
        info!("HTLC {} transitions {:?} -> {:?}", id, htlc.state, next);
        htlc.state = next;
        match update {
            HtlcStateUpdate::Published(txid) => htlc.published_txid = Some(txid),
            HtlcStateUpdate::Error(reason) => htlc.error = Some(reason),
            HtlcStateUpdate::Resolved => {
                self.htlcs.remove(&id);
            }
            HtlcStateUpdate::Onchain => {}
        }
        Ok(())
    }
}

impl HtlcMonitorActor {
    async fn check(&self, state: &mut HtlcMonitorActorState) {
        match self.height_source.fetch_block_height().await {
            Ok(height) => {
                state.apply_height(height);
                state.last_error = None;
            }
            Err(err) => {
                warn!("Failed to fetch chain height, keeping stale HTLC data: {}", err);
                state.last_error = Some(err.to_string());
            }
        }
        state.last_check_at = Some(now_timestamp_as_millis_u64());
        state.recompute();
    }

    async fn add_htlc(
        &self,
        state: &mut HtlcMonitorActorState,
        info: HtlcInfo,
    ) -> Result<MonitoredHtlc, HtlcMonitorError> {
        if state.htlcs.contains_key(&info.id) {
            return Err(HtlcMonitorError::DuplicateHtlc(info.id));
        }
        if state.current_height.is_none() {
            self.check(state).await;
        }
        let mut htlc = MonitoredHtlc::new(info);
        htlc.preimage = state.preimages.get(&htlc.payment_hash).copied();
        htlc.refresh(state.current_height, state.config.safety_margin_blocks);
        debug!(
            "Tracking HTLC {} expiring at {} with urgency {:?}",
            htlc.id, htlc.cltv_expiry, htlc.urgency
        );
        state.htlcs.insert(htlc.id, htlc.clone());
        Ok(htlc)
    }
}

#[async_trait::async_trait]
impl Actor for HtlcMonitorActor {
    type Msg = HtlcMonitorMessage;
    type State = HtlcMonitorActorState;
    type Arguments = HtlcMonitorConfig;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        config: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(HtlcMonitorActorState::new(config))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HtlcMonitorMessage::AddHtlc(info, reply) => {
                let _ = reply.send(self.add_htlc(state, info).await);
            }
            HtlcMonitorMessage::RemoveHtlc(id, reply) => {
                let _ = reply.send(state.htlcs.remove(&id));
            }
            HtlcMonitorMessage::RegisterPreimage(payment_hash, preimage, reply) => {
                let _ = reply.send(state.register_preimage(payment_hash, preimage));
            }
            HtlcMonitorMessage::UpdateState(id, update, reply) => {
                let _ = reply.send(state.update_state(id, update));
            }
            HtlcMonitorMessage::CheckNow(reply) => {
                self.check(state).await;
                if let Some(reply) = reply {
                    let _ = reply.send(state.snapshot());
                }
            }
            HtlcMonitorMessage::StartMonitoring(reply) => {
                let started = if state.is_monitoring() {
                    false
                } else {
                    let interval = state.config.check_interval();
                    info!("Starting HTLC monitoring every {:?}", interval);
                    state.monitoring_handle = Some(
                        myself.send_interval(interval, || HtlcMonitorMessage::CheckNow(None)),
                    );
                    let _ = myself.send_message(HtlcMonitorMessage::CheckNow(None));
                    true
                };
                let _ = reply.send(started);
            }
            HtlcMonitorMessage::StopMonitoring(reply) => {
                let stopped = match state.monitoring_handle.take() {
                    Some(handle) => {
                        info!("Stopping HTLC monitoring");
                        handle.abort();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(stopped);
            }
            HtlcMonitorMessage::GetSnapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.monitoring_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Cloneable handle to the HTLC monitor actor.
#[derive(Clone)]
pub struct HtlcMonitor {
    actor: ActorRef<HtlcMonitorMessage>,
}

impl HtlcMonitor {
    pub async fn start(
        config: HtlcMonitorConfig,
        height_source: Arc<dyn BlockHeightSource>,
    ) -> crate::Result<Self> {
        let (actor, _handle) =
            Actor::spawn(None, HtlcMonitorActor::new(height_source), config).await?;
        Ok(Self { actor })
    }

    pub async fn add_htlc(&self, info: HtlcInfo) -> Result<MonitoredHtlc, HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::AddHtlc, info)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)?
    }

    pub async fn remove_htlc(&self, id: HtlcId) -> Result<Option<MonitoredHtlc>, HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::RemoveHtlc, id)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)
    }

    /// Idempotent, and may be called before the matching HTLC is added.
    pub async fn register_preimage(
        &self,
        payment_hash: Hash256,
        preimage: Hash256,
    ) -> Result<usize, HtlcMonitorError> {
        call!(
            self.actor,
            HtlcMonitorMessage::RegisterPreimage,
            payment_hash,
            preimage
        )
        .map_err(|_| HtlcMonitorError::MonitorUnavailable)?
    }

    async fn update_state(
        &self,
        id: HtlcId,
        update: HtlcStateUpdate,
    ) -> Result<(), HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::UpdateState, id, update)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)?
    }

    pub async fn mark_onchain(&self, id: HtlcId) -> Result<(), HtlcMonitorError> {
        self.update_state(id, HtlcStateUpdate::Onchain).await
    }

    pub async fn mark_published(&self, id: HtlcId, txid: Txid) -> Result<(), HtlcMonitorError> {
        self.update_state(id, HtlcStateUpdate::Published(txid)).await
    }

    pub async fn mark_resolved(&self, id: HtlcId) -> Result<(), HtlcMonitorError> {
        self.update_state(id, HtlcStateUpdate::Resolved).await
    }

    pub async fn mark_error(&self, id: HtlcId, reason: &str) -> Result<(), HtlcMonitorError> {
        self.update_state(id, HtlcStateUpdate::Error(reason.to_string()))
            .await
    }

    /// Refreshes the chain height and recomputes every tracked HTLC.
    pub async fn check_now(&self) -> Result<HtlcMonitorSnapshot, HtlcMonitorError> {
        call!(self.actor, |reply| HtlcMonitorMessage::CheckNow(Some(reply)))
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)
    }

    /// Returns false if monitoring was already running.
    pub async fn start_monitoring(&self) -> Result<bool, HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::StartMonitoring)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)
    }

    /// Stops future ticks. A check already running completes. Returns false if monitoring
    /// was not running.
    pub async fn stop_monitoring(&self) -> Result<bool, HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::StopMonitoring)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)
    }

    pub async fn snapshot(&self) -> Result<HtlcMonitorSnapshot, HtlcMonitorError> {
        call!(self.actor, HtlcMonitorMessage::GetSnapshot)
            .map_err(|_| HtlcMonitorError::MonitorUnavailable)
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}
