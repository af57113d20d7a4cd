use std::time::Duration;

use clap_serde_derive::ClapSerde;

pub const DEFAULT_HTLC_CHECK_INTERVAL_SECONDS: u64 = 30;
/// Blocks before expiry at which an on-chain claim should be published. Must leave room for
/// the claim to confirm before the counterparty can take the other path.
pub const DEFAULT_SAFETY_MARGIN_BLOCKS: u64 = 6;

// Use prefix `htlc-`/`HTLC_`
#[derive(ClapSerde, Debug, Clone)]
pub struct HtlcMonitorConfig {
    #[default(DEFAULT_HTLC_CHECK_INTERVAL_SECONDS)]
    #[arg(
        name = "HTLC_CHECK_INTERVAL_SECONDS",
        long = "htlc-check-interval-seconds",
        env,
        help = format!("seconds between chain height checks in continuous mode, default is {}", DEFAULT_HTLC_CHECK_INTERVAL_SECONDS)
    )]
    pub check_interval_seconds: u64,

    #[default(DEFAULT_SAFETY_MARGIN_BLOCKS)]
    #[arg(
        name = "HTLC_SAFETY_MARGIN_BLOCKS",
        long = "htlc-safety-margin-blocks",
        env,
        help = format!("blocks before expiry at which a claim transaction is recommended, default is {}", DEFAULT_SAFETY_MARGIN_BLOCKS)
    )]
    pub safety_margin_blocks: u64,
}

impl HtlcMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(1))
    }
}
