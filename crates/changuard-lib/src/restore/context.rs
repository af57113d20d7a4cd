use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::{backup::ChannelBackupRecord, now_timestamp_as_millis_u64, types::Hash256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestoreState {
    Pending,
    Connecting,
    RequestingClose,
    /// Waiting for the closing transaction and the sweep of our outputs.
    Monitoring,
    Completed,
    /// Terminal, but [`RestoreEvent::Retry`](super::RestoreEvent::Retry) re-enters `Pending`.
    Failed,
}

impl RestoreState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RestoreState::Completed | RestoreState::Failed)
    }
}

/// Restore progress of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreContext {
    pub backup: ChannelBackupRecord,
    pub state: RestoreState,
    pub error: Option<String>,
    pub closing_txid: Option<Txid>,
    /// Bumped each time the context is (re)started. Step results carry it so that results
    /// from a superseded run are dropped.
    pub attempt: u32,
    pub updated_at: u64,
}

impl RestoreContext {
    pub fn new(backup: ChannelBackupRecord) -> Self {
        Self {
            backup,
            state: RestoreState::Pending,
            error: None,
            closing_txid: None,
            attempt: 0,
            updated_at: now_timestamp_as_millis_u64(),
        }
    }

    pub fn channel_id(&self) -> Hash256 {
        self.backup.channel_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Channels not in a terminal state yet.
    pub pending_channels: usize,
    pub completed_channels: usize,
    pub failed_channels: usize,
    pub total_channels: usize,
}

impl RestoreSummary {
    pub fn from_contexts<'a>(contexts: impl IntoIterator<Item = &'a RestoreContext>) -> Self {
        contexts
            .into_iter()
            .fold(RestoreSummary::default(), |mut summary, context| {
                summary.total_channels += 1;
                match context.state {
                    RestoreState::Completed => summary.completed_channels += 1,
                    RestoreState::Failed => summary.failed_channels += 1,
                    _ => summary.pending_channels += 1,
                }
                summary
            })
    }

    /// Every channel reached `COMPLETED` or `FAILED`.
    pub fn is_complete(&self) -> bool {
        self.total_channels > 0 && self.pending_channels == 0
    }

    pub fn is_partial_success(&self) -> bool {
        self.is_complete() && self.completed_channels > 0 && self.failed_channels > 0
    }
}

/// A context that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreHistoryEntry {
    pub channel_id: Hash256,
    pub state: RestoreState,
    pub error: Option<String>,
    pub closing_txid: Option<Txid>,
    pub attempt: u32,
    pub finished_at: u64,
}

impl From<&RestoreContext> for RestoreHistoryEntry {
    fn from(context: &RestoreContext) -> Self {
        Self {
            channel_id: context.channel_id(),
            state: context.state,
            error: context.error.clone(),
            closing_txid: context.closing_txid,
            attempt: context.attempt,
            finished_at: context.updated_at,
        }
    }
}

/// Immutable copy of the orchestrator's state for readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSnapshot {
    pub contexts: Vec<RestoreContext>,
    pub summary: RestoreSummary,
    pub history: Vec<RestoreHistoryEntry>,
}

impl RestoreSnapshot {
    pub fn get(&self, channel_id: &Hash256) -> Option<&RestoreContext> {
        self.contexts
            .iter()
            .find(|context| &context.channel_id() == channel_id)
    }
}
