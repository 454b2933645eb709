use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cycle {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Cycle {
    /// A freshly marked cycle: open, no notes.
    pub fn open(start_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_date,
            end_date: None,
            notes: None,
        }
    }

    /// Build a cycle from local timestamps, dropping the time of day.
    pub fn from_local(start: DateTime<Local>, end: Option<DateTime<Local>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_date: start.date_naive(),
            end_date: end.map(|e| e.date_naive()),
            notes: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Averages {
    pub average_cycle_length: i64,
    pub average_menstruation_length: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Menstruation,
    Fertile,
    Ovulation,
    Predicted,
}

impl Phase {
    /// Rank used when labels are resolved by priority instead of write order.
    pub fn priority(self) -> u8 {
        match self {
            Phase::Menstruation => 4,
            Phase::Predicted => 3,
            Phase::Ovulation => 2,
            Phase::Fertile => 1,
        }
    }

    pub fn is_fertility(self) -> bool {
        matches!(self, Phase::Fertile | Phase::Ovulation)
    }
}

/// Date key (`YYYY-MM-DD`) to phase. Days without an entry are normal days.
pub type PhaseMap = BTreeMap<String, Phase>;

/// Today-relative snapshot for the summary card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub current_day_of_cycle: i64,
    pub next_period_start: NaiveDate,
    pub days_until_next_period: i64,
    pub is_late: bool,
    pub today_phase: Option<Phase>,
    pub averages: Averages,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayPhase {
    pub date: NaiveDate,
    pub key: String,
    pub phase: Option<Phase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppData {
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub settings: AppSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    pub auto_lock_minutes: u32,
    #[serde(default = "default_show_fertility")]
    pub show_fertility: bool,
}

fn default_show_fertility() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_lock_minutes: 5,
            show_fertility: true,
        }
    }
}

/// Data returned to the calendar for a month view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthData {
    pub year: i32,
    pub month: u32,
    pub days: Vec<DayPhase>,
    pub current_cycle: Option<Cycle>,
    pub summary: Option<CycleSummary>,
    pub averages: Averages,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_timestamps_drop_time_of_day() {
        let start = Local.with_ymd_and_hms(2025, 8, 15, 23, 30, 0).unwrap();
        let end = Local.with_ymd_and_hms(2025, 8, 19, 0, 5, 0).unwrap();
        let cycle = Cycle::from_local(start, Some(end));
        assert_eq!(cycle.start_date, NaiveDate::from_ymd_opt(2025, 8, 15).unwrap());
        assert_eq!(cycle.end_date, NaiveDate::from_ymd_opt(2025, 8, 19));
        assert!(!cycle.is_open());
    }

    #[test]
    fn phases_serialize_lowercase() {
        let mut map = PhaseMap::new();
        map.insert("2025-08-15".to_string(), Phase::Menstruation);
        map.insert("2025-09-26".to_string(), Phase::Ovulation);
        assert_eq!(
            serde_json::to_string(&map).unwrap(),
            r#"{"2025-08-15":"menstruation","2025-09-26":"ovulation"}"#
        );
    }

    #[test]
    fn settings_default_when_missing() {
        let data: AppData = serde_json::from_str(r#"{"cycles":[]}"#).unwrap();
        assert_eq!(data.settings, AppSettings::default());
        assert!(data.settings.show_fertility);
    }
}
