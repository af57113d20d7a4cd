//! Tracks in-flight HTLCs against their CLTV deadlines and recommends the on-chain action
//! to take before funds can be lost.

mod config;
pub use config::{HtlcMonitorConfig, DEFAULT_HTLC_CHECK_INTERVAL_SECONDS, DEFAULT_SAFETY_MARGIN_BLOCKS};

mod error;
pub use error::HtlcMonitorError;

mod state;
pub use state::{
    HtlcAction, HtlcDirection, HtlcId, HtlcInfo, HtlcMonitorSnapshot, HtlcMonitorState,
    HtlcUrgency, MonitoredHtlc, CRITICAL_URGENCY_BLOCKS, HIGH_URGENCY_BLOCKS,
    MEDIUM_URGENCY_BLOCKS,
};

mod monitor;
pub use monitor::{HtlcMonitor, HtlcMonitorActor, HtlcMonitorMessage, HtlcStateUpdate};

mod sweeper;
pub use sweeper::{priority_for_urgency, HtlcSweeper, HtlcTxBuilder, BROADCAST_CIRCUIT_BREAKER};

#[cfg(test)]
mod tests;
