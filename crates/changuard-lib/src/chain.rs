//! Chain access consumed by the engine. The Electrum client (or any other backend) lives
//! outside this crate and implements these traits.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain query failed: {0}")]
    QueryFailed(String),
}

#[async_trait::async_trait]
pub trait BlockHeightSource: Send + Sync {
    async fn fetch_block_height(&self) -> Result<u64, ChainError>;
}

/// How far the on-chain settlement of a closed channel has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// The closing transaction is not confirmed yet.
    Unconfirmed,
    /// The closing transaction is confirmed, some outputs are still timelocked or unswept.
    AwaitingSweep,
    /// Every output that pays us has been swept.
    Swept,
}

#[async_trait::async_trait]
pub trait SweepWatcher: Send + Sync {
    async fn sweep_status(
        &self,
        channel_id: &Hash256,
        closing_txid: &Txid,
    ) -> Result<SweepStatus, ChainError>;
}
