//! Menstrual cycle phase prediction over a sparse history of logged cycles,
//! with an encrypted on-device journal to keep that history.

pub mod config;
pub mod crypto;
pub mod journal;
pub mod models;
pub mod prediction;
pub mod storage;

pub use config::JournalConfig;
pub use journal::{CycleJournal, JournalError};
pub use models::{Averages, Cycle, Phase, PhaseMap};
pub use prediction::{
    compute_averages, compute_phase_map, date_key, parse_date_key, validate_cycles, Precedence,
    Predictor, PredictorConfig,
};
