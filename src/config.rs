use std::env;
use std::path::PathBuf;

use crate::crypto::KdfParams;

/// Overrides the journal directory when set.
pub const DATA_DIR_ENV: &str = "SAFEHER_DATA_DIR";
const APP_DIR: &str = "safeher";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no local data directory on this platform; set SAFEHER_DATA_DIR")]
    NoDataDir,
}

/// Where the encrypted journal lives and how it is protected.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalConfig {
    pub data_dir: PathBuf,
    pub kdf: KdfParams,
    /// Wipe the journal after this many consecutive failed unlocks
    pub wipe_after_attempts: Option<u32>,
}

impl JournalConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            kdf: KdfParams::default(),
            wipe_after_attempts: None,
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn wipe_after(mut self, attempts: u32) -> Self {
        self.wipe_after_attempts = Some(attempts.max(1));
        self
    }

    /// `SAFEHER_DATA_DIR` if set and non-empty, else the platform's local data dir.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Ok(Self::new(dir)),
            _ => Self::platform_default(),
        }
    }

    pub fn platform_default() -> Result<Self, ConfigError> {
        let base = dirs::data_local_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(Self::new(base.join(APP_DIR)))
    }
}
