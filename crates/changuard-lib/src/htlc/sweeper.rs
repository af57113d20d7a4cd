use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use bitcoin::Txid;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{HtlcAction, HtlcId, HtlcMonitor, HtlcMonitorError, HtlcUrgency, MonitoredHtlc};
use crate::{
    recovery::{RecoveryError, RecoveryPriority, RecoveryResult, RecoveryScheduler},
    transport::PeerTransport,
};

/// Breaker shared by every broadcast the sweeper dispatches.
pub const BROADCAST_CIRCUIT_BREAKER: &str = "broadcast";

/// Builds and signs the on-chain claim for an HTLC. Transaction construction lives outside
/// this crate.
#[async_trait::async_trait]
pub trait HtlcTxBuilder: Send + Sync {
    /// Returns the raw transaction hex spending the HTLC output along `action`.
    async fn build_claim_tx(
        &self,
        htlc: &MonitoredHtlc,
        action: HtlcAction,
    ) -> Result<String, HtlcMonitorError>;
}

pub fn priority_for_urgency(urgency: HtlcUrgency) -> RecoveryPriority {
    match urgency {
        HtlcUrgency::Low => RecoveryPriority::Low,
        HtlcUrgency::Medium => RecoveryPriority::Medium,
        HtlcUrgency::High => RecoveryPriority::High,
        HtlcUrgency::Critical => RecoveryPriority::Critical,
    }
}

/// Turns the monitor's recommended actions into broadcasts routed through the scheduler.
#[derive(Clone)]
pub struct HtlcSweeper {
    monitor: HtlcMonitor,
    scheduler: RecoveryScheduler,
    transport: Arc<dyn PeerTransport>,
    builder: Arc<dyn HtlcTxBuilder>,
    in_progress: Arc<Mutex<HashSet<HtlcId>>>,
}

impl HtlcSweeper {
    pub fn new(
        monitor: HtlcMonitor,
        scheduler: RecoveryScheduler,
        transport: Arc<dyn PeerTransport>,
        builder: Arc<dyn HtlcTxBuilder>,
    ) -> Self {
        Self {
            monitor,
            scheduler,
            transport,
            builder,
            in_progress: Default::default(),
        }
    }

    /// Dispatches a claim for every actionable HTLC and waits for the dispatches.
    ///
    /// HTLCs whose earlier dispatch is still running are skipped. Each returned entry is
    /// the broadcast txid or the terminal scheduler error for that HTLC.
    pub async fn sweep(&self) -> Result<Vec<(HtlcId, RecoveryResult<Txid>)>, HtlcMonitorError> {
        let snapshot = self.monitor.snapshot().await?;
        let candidates: Vec<MonitoredHtlc> = snapshot
            .actionable()
            .filter(|htlc| self.try_claim(htlc.id))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Sweeping {} actionable HTLCs", candidates.len());

        let dispatches = candidates.into_iter().map(|htlc| self.dispatch(htlc));
        Ok(join_all(dispatches).await)
    }

    fn try_claim(&self, id: HtlcId) -> bool {
        self.in_progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id)
    }

    fn release(&self, id: &HtlcId) {
        self.in_progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    async fn dispatch(&self, htlc: MonitoredHtlc) -> (HtlcId, RecoveryResult<Txid>) {
        let id = htlc.id;
        let action = htlc.recommended_action;
        let priority = priority_for_urgency(htlc.urgency);
        let name = format!("broadcast:{}", id);
        let builder = self.builder.clone();
        let transport = self.transport.clone();
        let htlc = Arc::new(htlc);

        let result = self
            .scheduler
            .schedule_and_wait(&name, priority, Some(BROADCAST_CIRCUIT_BREAKER), move || {
                let builder = builder.clone();
                let transport = transport.clone();
                let htlc = htlc.clone();
                async move {
                    let tx_hex = builder
                        .build_claim_tx(&htlc, action)
                        .await
                        .map_err(|err| RecoveryError::Other(err.to_string()))?;
                    Ok::<_, RecoveryError>(transport.broadcast(&tx_hex).await?)
                }
            })
            .await;

        match &result {
            Ok(txid) => {
                info!("Broadcast {:?} for HTLC {}: {}", action, id, txid);
                if let Err(err) = self.monitor.mark_published(id, *txid).await {
                    warn!("Failed to mark HTLC {} as published: {}", id, err);
                }
            }
            Err(err) => warn!("Failed to broadcast {:?} for HTLC {}: {}", action, id, err),
        }
        self.release(&id);
        (id, result)
    }
}
