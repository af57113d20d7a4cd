use clap_serde_derive::ClapSerde;

use super::KdfParams;

pub const DEFAULT_KDF_LOG_N: u8 = 15;
pub const DEFAULT_KDF_R: u32 = 8;
pub const DEFAULT_KDF_P: u32 = 1;

// Use prefix `backup-`/`BACKUP_`
#[derive(ClapSerde, Debug, Clone)]
pub struct BackupConfig {
    /// scrypt cost, as a power of two.
    #[default(DEFAULT_KDF_LOG_N)]
    #[arg(
        name = "BACKUP_KDF_LOG_N",
        long = "backup-kdf-log-n",
        env,
        help = format!("scrypt log2(N) used for new backups, default is {}", DEFAULT_KDF_LOG_N)
    )]
    pub kdf_log_n: u8,

    #[default(DEFAULT_KDF_R)]
    #[arg(
        name = "BACKUP_KDF_R",
        long = "backup-kdf-r",
        env,
        help = format!("scrypt block size used for new backups, default is {}", DEFAULT_KDF_R)
    )]
    pub kdf_r: u32,

    #[default(DEFAULT_KDF_P)]
    #[arg(
        name = "BACKUP_KDF_P",
        long = "backup-kdf-p",
        env,
        help = format!("scrypt parallelism used for new backups, default is {}", DEFAULT_KDF_P)
    )]
    pub kdf_p: u32,
}

impl BackupConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            log_n: self.kdf_log_n,
            r: self.kdf_r,
            p: self.kdf_p,
        }
    }
}
