use std::fmt;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::types::Hash256;

/// Blocks-until-expiry below which an HTLC is critical.
pub const CRITICAL_URGENCY_BLOCKS: i64 = 3;
/// Exclusive like the other bounds: exactly 6 blocks from expiry is already `Medium`.
pub const HIGH_URGENCY_BLOCKS: i64 = 6;
/// Exclusive: exactly 18 blocks from expiry is `Low`.
pub const MEDIUM_URGENCY_BLOCKS: i64 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HtlcId {
    pub channel_id: Hash256,
    pub htlc_id: u64,
}

impl HtlcId {
    pub fn new(channel_id: Hash256, htlc_id: u64) -> Self {
        Self {
            channel_id,
            htlc_id,
        }
    }
}

impl fmt::Display for HtlcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.htlc_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HtlcMonitorState {
    Pending,
    /// The channel was closed and the HTLC output is on chain.
    Onchain,
    HtlcTxPublished,
    Resolved,
    /// The CLTV expiry height has been reached.
    Expired,
    Error,
}

impl HtlcMonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HtlcMonitorState::Resolved | HtlcMonitorState::Expired | HtlcMonitorState::Error
        )
    }

    /// `EXPIRED` and `ERROR` can be entered from any non-terminal state. An expired HTLC may
    /// still get its timeout transaction published.
    pub fn can_transition_to(&self, next: HtlcMonitorState) -> bool {
        use HtlcMonitorState::*;
        match (self, next) {
            (Pending, Onchain)
            | (Onchain, HtlcTxPublished)
            | (Expired, HtlcTxPublished)
            | (Onchain, Resolved)
            | (HtlcTxPublished, Resolved)
            | (Expired, Resolved) => true,
            (from, Expired | Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcUrgency {
    Low,
    Medium,
    High,
    Critical,
}

impl HtlcUrgency {
    /// Thresholds are exclusive, so an HTLC exactly 3 blocks from expiry is `High`.
    /// An unknown distance (no chain height yet) is `Low`.
    pub fn from_blocks_until_expiry(blocks: Option<i64>) -> Self {
        match blocks {
            None => HtlcUrgency::Low,
            Some(blocks) if blocks < CRITICAL_URGENCY_BLOCKS => HtlcUrgency::Critical,
            Some(blocks) if blocks < HIGH_URGENCY_BLOCKS => HtlcUrgency::High,
            Some(blocks) if blocks < MEDIUM_URGENCY_BLOCKS => HtlcUrgency::Medium,
            Some(_) => HtlcUrgency::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HtlcAction {
    None,
    PublishSuccess,
    PublishTimeout,
}

impl HtlcAction {
    pub fn recommend(
        direction: HtlcDirection,
        has_preimage: bool,
        blocks_until_expiry: Option<i64>,
        safety_margin_blocks: u64,
    ) -> Self {
        let within_margin = matches!(
            blocks_until_expiry,
            Some(blocks) if blocks <= safety_margin_blocks as i64
        );
        match direction {
            _ if !within_margin => HtlcAction::None,
            HtlcDirection::Received if has_preimage => HtlcAction::PublishSuccess,
            HtlcDirection::Received => HtlcAction::None,
            HtlcDirection::Sent => HtlcAction::PublishTimeout,
        }
    }
}

/// An HTLC reported by a channel, before the monitor starts tracking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcInfo {
    pub id: HtlcId,
    pub payment_hash: Hash256,
    pub amount_sat: u64,
    /// Absolute block height.
    pub cltv_expiry: u64,
    pub direction: HtlcDirection,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredHtlc {
    pub id: HtlcId,
    pub payment_hash: Hash256,
    pub amount_sat: u64,
    pub cltv_expiry: u64,
    pub direction: HtlcDirection,
    pub state: HtlcMonitorState,
    pub preimage: Option<Hash256>,
    pub blocks_until_expiry: Option<i64>,
    pub urgency: HtlcUrgency,
    pub recommended_action: HtlcAction,
    pub published_txid: Option<Txid>,
    pub error: Option<String>,
}

impl MonitoredHtlc {
    pub fn new(info: HtlcInfo) -> Self {
        Self {
            id: info.id,
            payment_hash: info.payment_hash,
            amount_sat: info.amount_sat,
            cltv_expiry: info.cltv_expiry,
            direction: info.direction,
            state: HtlcMonitorState::Pending,
            preimage: None,
            blocks_until_expiry: None,
            urgency: HtlcUrgency::Low,
            recommended_action: HtlcAction::None,
            published_txid: None,
            error: None,
        }
    }

    /// Recomputes every height-derived field from scratch.
    pub fn refresh(&mut self, current_height: Option<u64>, safety_margin_blocks: u64) {
        self.blocks_until_expiry =
            current_height.map(|height| self.cltv_expiry as i64 - height as i64);
        self.urgency = HtlcUrgency::from_blocks_until_expiry(self.blocks_until_expiry);
        self.recommended_action = HtlcAction::recommend(
            self.direction,
            self.preimage.is_some(),
            self.blocks_until_expiry,
            safety_margin_blocks,
        );
        // A published claim keeps its state, expiry only matters before broadcasting.
        if let Some(height) = current_height {
            if height >= self.cltv_expiry
                && matches!(
                    self.state,
                    HtlcMonitorState::Pending | HtlcMonitorState::Onchain
                )
            {
                self.state = HtlcMonitorState::Expired;
            }
        }
    }

    /// Whether a claim transaction should be published for this HTLC now.
    pub fn is_actionable(&self) -> bool {
        self.recommended_action != HtlcAction::None
            && self.published_txid.is_none()
            && matches!(
                self.state,
                HtlcMonitorState::Onchain | HtlcMonitorState::Expired
            )
    }
}

impl fmt::Debug for MonitoredHtlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredHtlc")
            .field("id", &self.id)
            .field("payment_hash", &self.payment_hash)
            .field("amount_sat", &self.amount_sat)
            .field("cltv_expiry", &self.cltv_expiry)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("preimage", &self.preimage.map(|_| "<redacted>"))
            .field("blocks_until_expiry", &self.blocks_until_expiry)
            .field("urgency", &self.urgency)
            .field("recommended_action", &self.recommended_action)
            .field("published_txid", &self.published_txid)
            .field("error", &self.error)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcMonitorSnapshot {
    pub current_height: Option<u64>,
    /// Error of the most recent height fetch, cleared by the next successful one.
    pub last_error: Option<String>,
    pub last_check_at: Option<u64>,
    pub monitoring: bool,
    /// Most urgent first.
    pub htlcs: Vec<MonitoredHtlc>,
}

impl HtlcMonitorSnapshot {
    pub fn get(&self, id: &HtlcId) -> Option<&MonitoredHtlc> {
        self.htlcs.iter().find(|htlc| &htlc.id == id)
    }

    pub fn actionable(&self) -> impl Iterator<Item = &MonitoredHtlc> {
        self.htlcs.iter().filter(|htlc| htlc.is_actionable())
    }
}

/// Ordering used by snapshots: most urgent first, then closest to expiry.
pub(crate) fn sort_by_urgency(htlcs: &mut [MonitoredHtlc]) {
    htlcs.sort_by(|a, b| {
        b.urgency
            .cmp(&a.urgency)
            .then_with(|| {
                a.blocks_until_expiry
                    .unwrap_or(i64::MAX)
                    .cmp(&b.blocks_until_expiry.unwrap_or(i64::MAX))
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}
