use std::fmt;

use bitcoin::Txid;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{transport::PeerAddress, types::Hash256, utils::serde_utils::SliceHex};

/// Everything needed to recover one channel's funds on a fresh device.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBackupRecord {
    pub channel_id: Hash256,
    /// The peer's node id.
    pub node_id: PublicKey,
    pub funding_txid: Txid,
    pub host: String,
    pub port: u16,
    pub is_initiator: bool,
    /// Opaque material from which revocation and commitment keys are re-derived.
    #[serde_as(as = "SliceHex")]
    pub channel_secret: Vec<u8>,
}

impl ChannelBackupRecord {
    pub fn peer_address(&self) -> PeerAddress {
        PeerAddress {
            node_id: self.node_id,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl fmt::Debug for ChannelBackupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBackupRecord")
            .field("channel_id", &self.channel_id)
            .field("node_id", &self.node_id)
            .field("funding_txid", &self.funding_txid)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("is_initiator", &self.is_initiator)
            .field("channel_secret", &"<redacted>")
            .finish()
    }
}
