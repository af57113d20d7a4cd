//! Peer-facing network operations. Callers must route these through the
//! [`RecoveryScheduler`](crate::recovery::RecoveryScheduler) so they are isolated by circuit
//! breakers and retried.

use bitcoin::Txid;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer {peer} is unreachable: {reason}")]
    PeerUnreachable { peer: PublicKey, reason: String },
    #[error("Close request for channel {channel_id} rejected: {reason}")]
    CloseRequestRejected { channel_id: Hash256, reason: String },
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub node_id: PublicKey,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.node_id, self.host, self.port)
    }
}

/// A live connection to a peer, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub node_id: PublicKey,
    pub connected_at: u64,
}

#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync {
    async fn connect(&self, peer: &PeerAddress) -> Result<PeerConnection, TransportError>;

    /// Ask the peer to close the channel (cooperatively if it can, otherwise by force) and
    /// return the closing transaction id.
    async fn request_close(&self, channel_id: &Hash256) -> Result<Txid, TransportError>;

    async fn broadcast(&self, tx_hex: &str) -> Result<Txid, TransportError>;
}
