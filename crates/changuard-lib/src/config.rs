use std::{
    fs::File,
    io::{BufReader, ErrorKind},
    path::PathBuf,
};

use clap::Args;
use clap_serde_derive::ClapSerde;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    backup::BackupConfig, htlc::HtlcMonitorConfig, recovery::RecoveryConfig,
    restore::RestoreConfig,
};

const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";
const DEFAULT_BASE_DIR_NAME: &str = ".changuard";
const DEFAULT_STORAGE_DIR_NAME: &str = "secure";

fn get_default_base_dir() -> PathBuf {
    let mut path = home::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(DEFAULT_BASE_DIR_NAME);
    path
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Invalid config file {path:?}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },
}

#[derive(Args)]
pub struct ConfigArgs {
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: $BASE_DIR/{}]", DEFAULT_CONFIG_FILE_NAME))]
    pub config_path: Option<PathBuf>,

    /// base directory for all [default: $HOME/.changuard]
    #[arg(short = 'd', long = "dir")]
    pub base_dir: Option<PathBuf>,

    #[command(flatten)]
    pub recovery: <RecoveryConfig as ClapSerde>::Opt,

    #[command(flatten)]
    pub htlc: <HtlcMonitorConfig as ClapSerde>::Opt,

    #[command(flatten)]
    pub backup: <BackupConfig as ClapSerde>::Opt,

    #[command(flatten)]
    pub restore: <RestoreConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
struct SerializedConfig {
    recovery: Option<<RecoveryConfig as ClapSerde>::Opt>,
    htlc: Option<<HtlcMonitorConfig as ClapSerde>::Opt>,
    backup: Option<<BackupConfig as ClapSerde>::Opt>,
    restore: Option<<RestoreConfig as ClapSerde>::Opt>,
}

/// Settings of every component. Values on the command line (or in the environment) take
/// precedence over the config file, which takes precedence over the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub recovery: RecoveryConfig,
    pub htlc: HtlcMonitorConfig,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
}

impl Config {
    pub fn from_args(mut args: ConfigArgs) -> Result<Self, ConfigError> {
        let base_dir = args.base_dir.take().unwrap_or_else(get_default_base_dir);
        // A missing file is only fine when the user did not ask for one explicitly.
        let (config_file, required) = match args.config_path.take() {
            Some(path) => (path, true),
            None => (base_dir.join(DEFAULT_CONFIG_FILE_NAME), false),
        };

        let serialized = match File::open(&config_file) {
            Ok(file) => {
                debug!("Reading config file {:?}", config_file);
                let config: SerializedConfig = serde_yaml::from_reader(BufReader::new(file))
                    .map_err(|err| ConfigError::InvalidFile {
                        path: config_file.clone(),
                        reason: err.to_string(),
                    })?;
                Some(config)
            }
            Err(err) if err.kind() == ErrorKind::NotFound && !required => None,
            Err(err) => return Err(err.into()),
        };

        let (recovery, htlc, backup, restore) = match serialized {
            Some(c) => (c.recovery, c.htlc, c.backup, c.restore),
            None => (None, None, None, None),
        };

        let recovery = match recovery {
            Some(c) => RecoveryConfig::from(c).merge(&mut args.recovery),
            None => RecoveryConfig::from(&mut args.recovery),
        };
        let htlc = match htlc {
            Some(c) => HtlcMonitorConfig::from(c).merge(&mut args.htlc),
            None => HtlcMonitorConfig::from(&mut args.htlc),
        };
        let backup = match backup {
            Some(c) => BackupConfig::from(c).merge(&mut args.backup),
            None => BackupConfig::from(&mut args.backup),
        };
        let restore = match restore {
            Some(c) => RestoreConfig::from(c).merge(&mut args.restore),
            None => RestoreConfig::from(&mut args.restore),
        };

        Ok(Self {
            base_dir,
            recovery,
            htlc,
            backup,
            restore,
        })
    }

    /// Directory of the file backed secure storage.
    pub fn storage_dir(&self) -> PathBuf {
        self.base_dir.join(DEFAULT_STORAGE_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let cli = TestCli::try_parse_from(args).expect("parse args");
        Config::from_args(cli.config)
    }

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let base_dir = dir.path().to_str().unwrap();
        let config = parse(&["changuard", "-d", base_dir]).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.storage_dir(), dir.path().join("secure"));
        assert_eq!(config.recovery.failure_threshold, 5);
        assert_eq!(config.recovery.max_concurrent_recoveries, 3);
        assert_eq!(config.htlc.safety_margin_blocks, 6);
        assert_eq!(config.backup.kdf_log_n, 15);
        assert_eq!(config.restore.sweep_poll_interval_ms, 60_000);
    }

    #[test]
    fn test_command_line_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yml"),
            "recovery:\n  failure_threshold: 2\n  max_attempts: 5\nhtlc:\n  safety_margin_blocks: 12\n",
        )
        .unwrap();

        let base_dir = dir.path().to_str().unwrap();
        let config = parse(&[
            "changuard",
            "-d",
            base_dir,
            "--recovery-max-attempts",
            "7",
        ])
        .unwrap();
        assert_eq!(config.recovery.failure_threshold, 2);
        assert_eq!(config.recovery.max_attempts, 7);
        assert_eq!(config.recovery.base_delay_ms, 1000);
        assert_eq!(config.htlc.safety_margin_blocks, 12);
        assert_eq!(config.htlc.check_interval_seconds, 30);
    }

    #[test]
    fn test_explicit_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let result = parse(&[
            "changuard",
            "-d",
            dir.path().to_str().unwrap(),
            "-c",
            missing.to_str().unwrap(),
        ]);
        assert!(matches!(result, Err(ConfigError::IO(_))));
    }

    #[test]
    fn test_malformed_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "recovery: [not, a, map]\n").unwrap();
        let result = parse(&["changuard", "-d", dir.path().to_str().unwrap()]);
        assert!(matches!(result, Err(ConfigError::InvalidFile { .. })));
    }
}
