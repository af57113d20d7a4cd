use thiserror::Error;

use super::{HtlcId, HtlcMonitorState};
use crate::{chain::ChainError, types::Hash256};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HtlcMonitorError {
    #[error("HTLC {0} is not tracked")]
    HtlcNotFound(HtlcId),
    #[error("HTLC {0} is already tracked")]
    DuplicateHtlc(HtlcId),
    #[error("Preimage does not hash to payment hash {0}")]
    PreimageMismatch(Hash256),
    #[error("Invalid state transition for HTLC {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: HtlcId,
        from: HtlcMonitorState,
        to: HtlcMonitorState,
    },
    #[error("Failed to build transaction for HTLC {id}: {reason}")]
    TxBuildFailed { id: HtlcId, reason: String },
    #[error("HTLC monitor is not running")]
    MonitorUnavailable,
    #[error(transparent)]
    Chain(#[from] ChainError),
}
