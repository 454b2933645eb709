use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use zeroize::Zeroizing;

use crate::config::JournalConfig;
use crate::crypto::{self, KdfParams};
use crate::models::AppData;

const JOURNAL_FILE: &str = "cycles.safeher";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One encrypted journal file under a data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
    kdf: KdfParams,
}

impl Storage {
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            path: config.data_dir.join(JOURNAL_FILE),
            kdf: config.kdf,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a journal was set up here before.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Seal and write through a temp file + rename, so the previous journal
    /// survives a failed or interrupted save.
    pub fn save(&self, passphrase: &str, data: &AppData) -> Result<(), StorageError> {
        let json = Zeroizing::new(serde_json::to_vec(data)?);
        let sealed = crypto::seal(passphrase, &json, self.kdf)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp_path = self.tmp_path();
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(&sealed)?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, &self.path)?;

        debug!("journal saved ({} cycles)", data.cycles.len());
        Ok(())
    }

    /// Decrypt with the cost recorded in the file, whatever `kdf` is now.
    pub fn load(&self, passphrase: &str) -> Result<AppData, StorageError> {
        let sealed = fs::read(&self.path)?;
        let json = crypto::open(passphrase, &sealed)?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_file_name(format!(".{JOURNAL_FILE}.tmp"))
    }

    /// Delete the journal permanently.
    pub fn wipe(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cycle;
    use chrono::NaiveDate;

    #[test]
    fn saved_journal_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&JournalConfig::new(dir.path().join("nested")).with_kdf(KdfParams {
            memory_kib: 8,
            iterations: 1,
        }));
        assert!(!storage.exists());

        let mut data = AppData::default();
        data.cycles
            .push(Cycle::open(NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()));
        storage.save("passphrase", &data).unwrap();
        assert!(storage.exists());

        let loaded = storage.load("passphrase").unwrap();
        assert_eq!(loaded.cycles, data.cycles);
        assert_eq!(loaded.settings, data.settings);

        assert!(matches!(
            storage.load("other"),
            Err(StorageError::Crypto(_))
        ));

        assert!(!storage.tmp_path().exists());

        storage.wipe().unwrap();
        assert!(!storage.exists());
        // wiping twice is fine
        storage.wipe().unwrap();
    }

    #[test]
    fn resave_replaces_journal_and_reads_stored_cost() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig::new(dir.path()).with_kdf(KdfParams {
            memory_kib: 8,
            iterations: 1,
        });
        let storage = Storage::new(&config);
        storage.save("passphrase", &AppData::default()).unwrap();

        let mut data = AppData::default();
        data.settings.auto_lock_minutes = 30;
        storage.save("passphrase", &data).unwrap();

        let reconfigured = Storage::new(&config.with_kdf(KdfParams {
            memory_kib: 16,
            iterations: 2,
        }));
        assert_eq!(reconfigured.load("passphrase").unwrap().settings.auto_lock_minutes, 30);
        assert!(!storage.tmp_path().exists());
    }

    #[test]
    fn stale_temp_file_does_not_hide_journal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&JournalConfig::new(dir.path()).with_kdf(KdfParams {
            memory_kib: 8,
            iterations: 1,
        }));
        storage.save("passphrase", &AppData::default()).unwrap();
        // left behind by an interrupted save
        fs::write(storage.tmp_path(), b"partial").unwrap();

        assert!(storage.load("passphrase").is_ok());
        storage.save("passphrase", &AppData::default()).unwrap();
        assert!(!storage.tmp_path().exists());
    }
}
