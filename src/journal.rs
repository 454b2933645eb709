use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use log::{info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::config::JournalConfig;
use crate::crypto::CryptoError;
use crate::models::*;
use crate::prediction::{self, Predictor};
use crate::storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal is locked")]
    Locked,
    #[error("a cycle already starts on {0}")]
    DuplicateStart(NaiveDate),
    #[error("the cycle started on {0} is still open; mark its end first")]
    CycleStillOpen(NaiveDate),
    #[error("there is no open cycle to close")]
    NoOpenCycle,
    #[error("end date {end} is before the cycle start {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("cycle {0} not found")]
    CycleNotFound(Uuid),
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("journal state lock poisoned")]
    Poisoned,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("export failed: {0}")]
    Export(#[from] serde_json::Error),
}

impl<T> From<PoisonError<T>> for JournalError {
    fn from(_: PoisonError<T>) -> Self {
        JournalError::Poisoned
    }
}

/// One user's cycle history, decrypted in memory only while unlocked.
pub struct CycleJournal {
    storage: Storage,
    predictor: Predictor,
    wipe_after_attempts: Option<u32>,
    passphrase: Mutex<Option<String>>,
    data: Mutex<Option<AppData>>,
    failed_unlocks: Mutex<u32>,
    last_activity: Mutex<Instant>,
}

impl CycleJournal {
    pub fn new(config: JournalConfig) -> Self {
        Self {
            storage: Storage::new(&config),
            predictor: Predictor::default(),
            wipe_after_attempts: config.wipe_after_attempts,
            passphrase: Mutex::new(None),
            data: Mutex::new(None),
            failed_unlocks: Mutex::new(0),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn with_predictor(mut self, predictor: Predictor) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn is_setup(&self) -> bool {
        self.storage.exists()
    }

    pub fn is_locked(&self) -> bool {
        match self.data.lock() {
            Ok(data) => data.is_none(),
            Err(_) => true,
        }
    }

    /// Create an empty journal sealed with `passphrase` and leave it unlocked.
    pub fn setup(&self, passphrase: String) -> Result<(), JournalError> {
        let data = AppData::default();
        self.storage.save(&passphrase, &data)?;

        *self.passphrase.lock()? = Some(passphrase);
        *self.data.lock()? = Some(data);
        *self.failed_unlocks.lock()? = 0;
        self.touch();
        info!("journal created at {}", self.storage.path().display());
        Ok(())
    }

    /// Returns `false` for a wrong passphrase. Only wrong passphrases count
    /// towards `wipe_after_attempts`; unreadable files are reported as errors.
    pub fn unlock(&self, mut passphrase: String) -> Result<bool, JournalError> {
        let mut data = match self.storage.load(&passphrase) {
            Ok(data) => data,
            Err(e) => {
                passphrase.zeroize();
                return match e {
                    StorageError::Crypto(CryptoError::Decryption) => {
                        self.record_failed_unlock()?;
                        Ok(false)
                    }
                    e => Err(e.into()),
                };
            }
        };

        sort_recent_first(&mut data.cycles);
        *self.passphrase.lock()? = Some(passphrase);
        *self.data.lock()? = Some(data);
        *self.failed_unlocks.lock()? = 0;
        self.touch();
        info!("journal unlocked");
        Ok(true)
    }

    fn record_failed_unlock(&self) -> Result<(), JournalError> {
        let mut failed = self.failed_unlocks.lock()?;
        *failed += 1;
        warn!("unlock failed ({} consecutive)", *failed);
        if self.wipe_after_attempts.is_some_and(|limit| *failed >= limit) {
            warn!("failed unlock limit reached, wiping journal");
            self.storage.wipe()?;
            *failed = 0;
        }
        Ok(())
    }

    /// Zeroize the passphrase and drop decrypted data from memory.
    pub fn lock(&self) {
        if let Ok(mut pass) = self.passphrase.lock() {
            if let Some(ref mut p) = *pass {
                p.zeroize();
            }
            *pass = None;
        }
        if let Ok(mut data) = self.data.lock() {
            *data = None;
        }
    }

    /// Lock when nothing touched the journal for `auto_lock_minutes`.
    pub fn lock_if_idle(&self, now: Instant) -> Result<bool, JournalError> {
        let minutes = match self.data.lock()?.as_ref() {
            Some(data) => data.settings.auto_lock_minutes,
            None => return Ok(false),
        };
        let idle = now.saturating_duration_since(*self.last_activity.lock()?);
        if idle >= Duration::from_secs(u64::from(minutes) * 60) {
            info!("auto-locking after {} idle minutes", minutes);
            self.lock();
            return Ok(true);
        }
        Ok(false)
    }

    /// Open a new cycle on `date`.
    pub fn mark_period_start(&self, date: NaiveDate) -> Result<Cycle, JournalError> {
        self.update(|data| {
            if data.cycles.iter().any(|c| c.start_date == date) {
                return Err(JournalError::DuplicateStart(date));
            }
            if let Some(open) = data.cycles.iter().find(|c| c.is_open()) {
                return Err(JournalError::CycleStillOpen(open.start_date));
            }

            let cycle = Cycle::open(date);
            data.cycles.push(cycle.clone());
            sort_recent_first(&mut data.cycles);
            Ok(cycle)
        })
    }

    /// Close the most recent open cycle on `date`.
    pub fn mark_period_end(&self, date: NaiveDate) -> Result<Cycle, JournalError> {
        self.update(|data| {
            let open = data
                .cycles
                .iter_mut()
                .filter(|c| c.is_open())
                .max_by_key(|c| c.start_date)
                .ok_or(JournalError::NoOpenCycle)?;

            if date < open.start_date {
                return Err(JournalError::EndBeforeStart {
                    start: open.start_date,
                    end: date,
                });
            }
            open.end_date = Some(date);
            Ok(open.clone())
        })
    }

    /// Replace a cycle's notes; blank notes clear them.
    pub fn update_notes(&self, id: Uuid, notes: String) -> Result<Cycle, JournalError> {
        self.update(|data| {
            let cycle = data
                .cycles
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(JournalError::CycleNotFound(id))?;
            cycle.notes = if notes.trim().is_empty() {
                None
            } else {
                Some(notes)
            };
            Ok(cycle.clone())
        })
    }

    pub fn delete_cycle(&self, id: Uuid) -> Result<(), JournalError> {
        self.update(|data| {
            let before = data.cycles.len();
            data.cycles.retain(|c| c.id != id);
            if data.cycles.len() == before {
                return Err(JournalError::CycleNotFound(id));
            }
            Ok(())
        })
    }

    /// Most recent first.
    pub fn cycles(&self) -> Result<Vec<Cycle>, JournalError> {
        self.read(|data| data.cycles.clone())
    }

    pub fn averages(&self) -> Result<Averages, JournalError> {
        self.read(|data| self.predictor.averages(&data.cycles))
    }

    pub fn phase_map(&self) -> Result<PhaseMap, JournalError> {
        self.read(|data| self.predictor.phase_map(&data.cycles))
    }

    pub fn summary(&self, today: NaiveDate) -> Result<Option<CycleSummary>, JournalError> {
        self.read(|data| self.predictor.summary(&data.cycles, today))
    }

    pub fn get_month(
        &self,
        year: i32,
        month: u32,
        today: NaiveDate,
    ) -> Result<MonthData, JournalError> {
        self.read(|data| {
            let mut phases = self.predictor.phase_map(&data.cycles);
            if !data.settings.show_fertility {
                phases.retain(|_, phase| !phase.is_fertility());
            }
            let days = prediction::month_view(&phases, year, month)
                .ok_or_else(|| JournalError::InvalidDate(format!("{year}-{month:02}")))?;

            Ok::<_, JournalError>(MonthData {
                year,
                month,
                days,
                current_cycle: data.cycles.iter().find(|c| c.is_open()).cloned(),
                summary: self.predictor.summary(&data.cycles, today),
                averages: self.predictor.averages(&data.cycles),
            })
        })?
    }

    pub fn get_settings(&self) -> Result<AppSettings, JournalError> {
        self.read(|data| data.settings.clone())
    }

    pub fn toggle_fertility(&self, enabled: bool) -> Result<(), JournalError> {
        self.update(|data| {
            data.settings.show_fertility = enabled;
            Ok(())
        })
    }

    pub fn update_settings(&self, auto_lock_minutes: u32) -> Result<(), JournalError> {
        self.update(|data| {
            data.settings.auto_lock_minutes = auto_lock_minutes.clamp(1, 60);
            Ok(())
        })
    }

    /// Plaintext JSON of the whole journal.
    pub fn export_data(&self) -> Result<String, JournalError> {
        self.read(|data| serde_json::to_string_pretty(data))?
            .map_err(JournalError::from)
    }

    pub fn wipe_all_data(&self) -> Result<(), JournalError> {
        self.lock();
        self.storage.wipe()?;
        warn!("journal wiped");
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&AppData) -> R) -> Result<R, JournalError> {
        let data_lock = self.data.lock()?;
        let data = data_lock.as_ref().ok_or(JournalError::Locked)?;
        let out = f(data);
        drop(data_lock);
        self.touch();
        Ok(out)
    }

    /// Apply `f` to a copy, persist it, then swap it in. A failed save leaves
    /// the in-memory journal untouched.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut AppData) -> Result<R, JournalError>,
    ) -> Result<R, JournalError> {
        let pass_lock = self.passphrase.lock()?;
        let mut data_lock = self.data.lock()?;
        let (Some(pass), Some(data)) = (pass_lock.as_ref(), data_lock.as_mut()) else {
            return Err(JournalError::Locked);
        };

        let mut next = data.clone();
        let out = f(&mut next)?;
        self.storage.save(pass, &next)?;
        *data = next;

        drop(data_lock);
        drop(pass_lock);
        self.touch();
        Ok(out)
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }
}

fn sort_recent_first(cycles: &mut [Cycle]) {
    cycles.sort_by(|a, b| b.start_date.cmp(&a.start_date));
}
