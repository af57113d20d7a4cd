use std::time::Duration;

use clap_serde_derive::ClapSerde;

pub const DEFAULT_SWEEP_POLL_INTERVAL_MS: u64 = 60 * 1000;

// Use prefix `restore-`/`RESTORE_`
#[derive(ClapSerde, Debug, Clone)]
pub struct RestoreConfig {
    /// How long to wait before asking the chain again whether a closed channel is swept.
    #[default(DEFAULT_SWEEP_POLL_INTERVAL_MS)]
    #[arg(
        name = "RESTORE_SWEEP_POLL_INTERVAL_MS",
        long = "restore-sweep-poll-interval-ms",
        env,
        help = format!("milliseconds between sweep status polls, default is {}", DEFAULT_SWEEP_POLL_INTERVAL_MS)
    )]
    pub sweep_poll_interval_ms: u64,
}

impl RestoreConfig {
    pub fn sweep_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_poll_interval_ms)
    }
}
