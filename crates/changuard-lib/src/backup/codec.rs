use std::{fmt, str::FromStr};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use scrypt::{scrypt, Params};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use tracing::{debug, info};

use super::{
    config::{DEFAULT_KDF_LOG_N, DEFAULT_KDF_P, DEFAULT_KDF_R},
    BackupError, ChannelBackupRecord,
};
use crate::now_timestamp_as_millis_u64;

/// Prefix of every exported blob. The suffix is the envelope version.
pub const BACKUP_FORMAT_TAG: &str = "changuard-backup-v1";
pub const ENVELOPE_VERSION: u8 = 1;
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;
pub const KDF_ALGORITHM: &str = "scrypt";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

// Upper bounds accepted on import, so a crafted blob cannot make us burn gigabytes of memory.
const MAX_KDF_LOG_N: u8 = 20;
const MAX_KDF_R: u32 = 32;
const MAX_KDF_P: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_KDF_LOG_N,
            r: DEFAULT_KDF_R,
            p: DEFAULT_KDF_P,
        }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.log_n == 0 || self.log_n > MAX_KDF_LOG_N {
            return Err(BackupError::InvalidKdfParams(format!(
                "log_n must be within 1..={}",
                MAX_KDF_LOG_N
            )));
        }
        if self.r == 0 || self.r > MAX_KDF_R || self.p == 0 || self.p > MAX_KDF_P {
            return Err(BackupError::InvalidKdfParams(format!(
                "r must be within 1..={} and p within 1..={}",
                MAX_KDF_R, MAX_KDF_P
            )));
        }
        Params::new(self.log_n, self.r, self.p, KEY_LEN)
            .map(|_| ())
            .map_err(|err| BackupError::InvalidKdfParams(err.to_string()))
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Key<Aes256Gcm>, BackupError> {
        let params = Params::new(self.log_n, self.r, self.p, KEY_LEN)
            .map_err(|err| BackupError::InvalidKdfParams(err.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt(password.as_bytes(), salt, &params, &mut key)
            .map_err(|err| BackupError::InvalidKdfParams(err.to_string()))?;
        Ok(*Key::<Aes256Gcm>::from_slice(&key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KdfDescriptor {
    algorithm: String,
    #[serde(flatten)]
    params: KdfParams,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    kdf: KdfDescriptor,
    #[serde_as(as = "Base64")]
    salt: Vec<u8>,
    #[serde_as(as = "Base64")]
    nonce: Vec<u8>,
    #[serde_as(as = "Base64")]
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Header fields authenticated alongside the ciphertext, so tampering with the KDF
    /// parameters or salt fails decryption.
    fn associated_data(version: u8, kdf: &KdfDescriptor, salt: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(BACKUP_FORMAT_TAG.len() + kdf.algorithm.len() + 32);
        aad.extend_from_slice(BACKUP_FORMAT_TAG.as_bytes());
        aad.push(version);
        aad.extend_from_slice(kdf.algorithm.as_bytes());
        aad.push(kdf.params.log_n);
        aad.extend_from_slice(&kdf.params.r.to_le_bytes());
        aad.extend_from_slice(&kdf.params.p.to_le_bytes());
        aad.extend_from_slice(salt);
        aad
    }

    fn parse(blob: &str) -> Option<Self> {
        let encoded = blob
            .trim()
            .strip_prefix(BACKUP_FORMAT_TAG)?
            .strip_prefix(':')?;
        let json = STANDARD.decode(encoded).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn is_well_formed(&self) -> bool {
        self.version == ENVELOPE_VERSION
            && self.kdf.algorithm == KDF_ALGORITHM
            && self.kdf.params.validate().is_ok()
            && self.salt.len() == SALT_LEN
            && self.nonce.len() == NONCE_LEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BackupPayload {
    schema_version: u32,
    created_at: u64,
    records: Vec<ChannelBackupRecord>,
}

/// Exported text form: `changuard-backup-v1:<base64 envelope>`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBackupBlob(String);

impl EncryptedBackupBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for EncryptedBackupBlob {
    fn from(value: String) -> Self {
        Self(value.trim().to_string())
    }
}

impl FromStr for EncryptedBackupBlob {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl fmt::Display for EncryptedBackupBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EncryptedBackupBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBackupBlob({} bytes)", self.0.len())
    }
}

/// A successfully decrypted backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedBackup {
    pub created_at: u64,
    pub records: Vec<ChannelBackupRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelBackupCodec {
    kdf: KdfParams,
}

impl ChannelBackupCodec {
    pub fn new(kdf: KdfParams) -> Result<Self, BackupError> {
        kdf.validate()?;
        Ok(Self { kdf })
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    pub fn export(
        &self,
        records: &[ChannelBackupRecord],
        password: &str,
    ) -> Result<EncryptedBackupBlob, BackupError> {
        if records.is_empty() {
            return Err(BackupError::EmptyBackup);
        }
        let payload = BackupPayload {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            created_at: now_timestamp_as_millis_u64(),
            records: records.to_vec(),
        };
        let plaintext = serde_json::to_vec(&payload)
            .map_err(|err| BackupError::EncryptionFailed(err.to_string()))?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let kdf = KdfDescriptor {
            algorithm: KDF_ALGORITHM.to_string(),
            params: self.kdf,
        };
        let key = self.kdf.derive_key(password, &salt)?;
        let aad = Envelope::associated_data(ENVELOPE_VERSION, &kdf, &salt);
        let ciphertext = Aes256Gcm::new(&key)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|err| BackupError::EncryptionFailed(err.to_string()))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            kdf,
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|err| BackupError::EncryptionFailed(err.to_string()))?;
        info!("Exported encrypted backup of {} channels", records.len());
        Ok(EncryptedBackupBlob(format!(
            "{}:{}",
            BACKUP_FORMAT_TAG,
            STANDARD.encode(json)
        )))
    }

    pub fn import(
        &self,
        blob: &EncryptedBackupBlob,
        password: &str,
    ) -> Result<Vec<ChannelBackupRecord>, BackupError> {
        self.import_backup(blob, password)
            .map(|backup| backup.records)
    }

    /// Decrypts a blob. Every failure, whatever its cause, is [`BackupError::DecryptionFailed`],
    /// and a malformed blob still pays for a key derivation.
    pub fn import_backup(
        &self,
        blob: &EncryptedBackupBlob,
        password: &str,
    ) -> Result<DecryptedBackup, BackupError> {
        let envelope = match Envelope::parse(blob.as_str()) {
            Some(envelope) if envelope.is_well_formed() => envelope,
            _ => {
                let _ = self.kdf.derive_key(password, &[0u8; SALT_LEN]);
                debug!("Rejecting malformed backup blob");
                return Err(BackupError::DecryptionFailed);
            }
        };

        let key = envelope
            .kdf
            .params
            .derive_key(password, &envelope.salt)
            .map_err(|_| BackupError::DecryptionFailed)?;
        let aad = Envelope::associated_data(envelope.version, &envelope.kdf, &envelope.salt);
        let plaintext = Aes256Gcm::new(&key)
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| BackupError::DecryptionFailed)?;

        let payload: BackupPayload =
            serde_json::from_slice(&plaintext).map_err(|_| BackupError::DecryptionFailed)?;
        if payload.schema_version != PAYLOAD_SCHEMA_VERSION || payload.records.is_empty() {
            return Err(BackupError::DecryptionFailed);
        }
        info!("Imported backup of {} channels", payload.records.len());
        Ok(DecryptedBackup {
            created_at: payload.created_at,
            records: payload.records,
        })
    }
}
