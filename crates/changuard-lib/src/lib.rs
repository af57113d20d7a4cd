mod config;
pub use config::{Config, ConfigArgs, ConfigError};


pub mod backup;
pub mod chain;
pub mod events;
pub mod htlc;
pub mod recovery;
pub mod restore;
pub mod storage;
pub mod transport;
pub mod types;

mod errors;
pub use errors::{Error, Result};

pub mod tasks;

pub mod utils;

use git_version::git_version;

const GIT_VERSION: &str = git_version!(fallback = "unknown");

pub fn get_git_version() -> &'static str {
    GIT_VERSION
}

/// Milliseconds since UNIX epoch. Tests may pin the value with [`set_mocked_time`].
pub fn now_timestamp_as_millis_u64() -> u64 {
    #[cfg(test)]
    {
        if let Some(mocked_time) = MOCKED_TIME.with(|time| *time.borrow()) {
            return mocked_time;
        }
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
thread_local! {
    static MOCKED_TIME: std::cell::RefCell<Option<u64>> = const { std::cell::RefCell::new(None) };
}

#[cfg(test)]
pub fn set_mocked_time(time: u64) {
    MOCKED_TIME.with(|t| {
        *t.borrow_mut() = Some(time);
    });
}

#[cfg(test)]
pub fn clear_mocked_time() {
    MOCKED_TIME.with(|t| {
        *t.borrow_mut() = None;
    });
}
