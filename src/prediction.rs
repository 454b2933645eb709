use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use log::{debug, warn};

use crate::models::{Averages, Cycle, CycleSummary, DayPhase, Phase, PhaseMap};

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// How a date touched by more than one rule ends up labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    /// Labels are written in rule order; later writes win, fertile never overwrites.
    #[default]
    WriteOrder,
    /// Each date keeps the label with the highest `Phase::priority`.
    Priority,
}

/// Tunable constants for the predictor.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Used when fewer than two cycles exist
    pub default_cycle_length: i64,
    /// Used when no cycle has an end date
    pub default_menstruation_length: i64,
    /// Number of future cycles to forecast
    pub forecast_cycles: u32,
    /// Ovulation is placed this many days before the next predicted start
    pub luteal_phase_days: i64,
    /// Fertile window length, ovulation day included
    pub fertile_window_days: i64,
    pub precedence: Precedence,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            default_cycle_length: 28,
            default_menstruation_length: 5,
            forecast_cycles: 6,
            luteal_phase_days: 14,
            fertile_window_days: 6,
            precedence: Precedence::WriteOrder,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("cycle starting {start} ends before it starts ({end})")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("more than one cycle starts on {0}")]
    DuplicateStart(NaiveDate),
    #[error("{0} cycles are open, at most one may be")]
    MultipleOpen(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Predictor {
    config: PredictorConfig,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Average cycle and menstruation lengths.
    ///
    /// With fewer than two cycles both fields fall back to the defaults, even
    /// if the single cycle has an end date.
    pub fn averages(&self, cycles: &[Cycle]) -> Averages {
        let defaults = Averages {
            average_cycle_length: self.config.default_cycle_length,
            average_menstruation_length: self.config.default_menstruation_length,
        };

        if cycles.len() < 2 {
            return defaults;
        }

        let mut sorted: Vec<&Cycle> = cycles.iter().collect();
        sorted.sort_by_key(|c| c.start_date);

        let cycle_lengths: Vec<i64> = sorted
            .windows(2)
            .map(|w| (w[1].start_date - w[0].start_date).num_days())
            .collect();

        let menstruation_lengths: Vec<i64> = sorted
            .iter()
            .filter_map(|c| c.end_date.map(|end| (end - c.start_date).num_days() + 1))
            .collect();

        Averages {
            average_cycle_length: rounded_mean(&cycle_lengths)
                .unwrap_or(defaults.average_cycle_length),
            average_menstruation_length: rounded_mean(&menstruation_lengths)
                .unwrap_or(defaults.average_menstruation_length),
        }
    }

    /// Label every known and forecast day of the history.
    pub fn phase_map(&self, cycles: &[Cycle]) -> PhaseMap {
        let mut map = PhaseMap::new();
        if cycles.is_empty() {
            return map;
        }

        let averages = self.averages(cycles);
        let mut sorted: Vec<&Cycle> = cycles.iter().collect();
        sorted.sort_by(|a, b| b.start_date.cmp(&a.start_date));

        let mut writer = PhaseWriter {
            map: &mut map,
            precedence: self.config.precedence,
        };

        for cycle in &sorted {
            let length = match cycle.end_date {
                Some(end) => (end - cycle.start_date).num_days() + 1,
                None => averages.average_menstruation_length,
            };
            for day in span(cycle.start_date, length) {
                writer.write(day, Phase::Menstruation);
            }
        }

        if averages.average_cycle_length <= 0 || averages.average_menstruation_length <= 0 {
            warn!(
                "skipping forecast: non-positive averages (cycle {}, menstruation {})",
                averages.average_cycle_length, averages.average_menstruation_length
            );
            return map;
        }

        let last = sorted[0];
        for i in 1..=i64::from(self.config.forecast_cycles) {
            let Some(predicted_start) = shift(last.start_date, i * averages.average_cycle_length)
            else {
                continue;
            };
            for day in span(predicted_start, averages.average_menstruation_length) {
                writer.write(day, Phase::Predicted);
            }

            let Some(ovulation_day) = shift(
                predicted_start,
                averages.average_cycle_length - self.config.luteal_phase_days,
            ) else {
                continue;
            };
            for back in 0..self.config.fertile_window_days {
                if let Some(day) = shift(ovulation_day, -back) {
                    writer.write_if_absent(day, Phase::Fertile);
                }
            }
            writer.write(ovulation_day, Phase::Ovulation);
        }

        debug!("phase map: {} cycles -> {} labelled days", cycles.len(), map.len());
        map
    }

    /// Where the user stands today relative to the most recent cycle.
    pub fn summary(&self, cycles: &[Cycle], today: NaiveDate) -> Option<CycleSummary> {
        let last = cycles.iter().max_by_key(|c| c.start_date)?;
        let averages = self.averages(cycles);
        let next_period_start = shift(last.start_date, averages.average_cycle_length)?;
        let days_until_next_period = (next_period_start - today).num_days();
        let today_phase = self.phase_map(cycles).get(&date_key(today)).copied();

        Some(CycleSummary {
            current_day_of_cycle: (today - last.start_date).num_days() + 1,
            next_period_start,
            days_until_next_period,
            is_late: days_until_next_period < 0,
            today_phase,
            averages,
        })
    }

    pub fn month_phases(&self, cycles: &[Cycle], year: i32, month: u32) -> Option<Vec<DayPhase>> {
        month_view(&self.phase_map(cycles), year, month)
    }
}

/// Averages with the default configuration.
pub fn compute_averages(cycles: &[Cycle]) -> Averages {
    Predictor::default().averages(cycles)
}

/// Phase map with the default configuration.
pub fn compute_phase_map(cycles: &[Cycle]) -> PhaseMap {
    Predictor::default().phase_map(cycles)
}

pub fn cycle_summary(cycles: &[Cycle], today: NaiveDate) -> Option<CycleSummary> {
    Predictor::default().summary(cycles, today)
}

/// Reject histories the journal would never produce.
pub fn validate_cycles(cycles: &[Cycle]) -> Result<(), PredictionError> {
    let mut starts = HashSet::with_capacity(cycles.len());
    for cycle in cycles {
        if let Some(end) = cycle.end_date {
            if end < cycle.start_date {
                return Err(PredictionError::EndBeforeStart {
                    start: cycle.start_date,
                    end,
                });
            }
        }
        if !starts.insert(cycle.start_date) {
            return Err(PredictionError::DuplicateStart(cycle.start_date));
        }
    }

    let open = cycles.iter().filter(|c| c.is_open()).count();
    if open > 1 {
        return Err(PredictionError::MultipleOpen(open));
    }
    Ok(())
}

/// Validate, then compute the phase map with the default configuration.
pub fn try_phase_map(cycles: &[Cycle]) -> Result<PhaseMap, PredictionError> {
    validate_cycles(cycles)?;
    Ok(compute_phase_map(cycles))
}

/// Format a calendar day as `YYYY-MM-DD`.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT).ok()
}

/// One entry per day of the month, looked up in `map`.
pub fn month_view(map: &PhaseMap, year: i32, month: u32) -> Option<Vec<DayPhase>> {
    let (first_day, last_day) = month_bounds(year, month)?;
    let days = first_day
        .iter_days()
        .take_while(|d| *d <= last_day)
        .map(|date| {
            let key = date_key(date);
            let phase = map.get(&key).copied();
            DayPhase { date, key, phase }
        })
        .collect();
    Some(days)
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first_day = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    Some((first_day, next_month.pred_opt()?))
}

struct PhaseWriter<'a> {
    map: &'a mut PhaseMap,
    precedence: Precedence,
}

impl PhaseWriter<'_> {
    fn write(&mut self, day: NaiveDate, phase: Phase) {
        match self.precedence {
            Precedence::WriteOrder => {
                self.map.insert(date_key(day), phase);
            }
            Precedence::Priority => self.keep_highest(day, phase),
        }
    }

    fn write_if_absent(&mut self, day: NaiveDate, phase: Phase) {
        match self.precedence {
            Precedence::WriteOrder => {
                self.map.entry(date_key(day)).or_insert(phase);
            }
            Precedence::Priority => self.keep_highest(day, phase),
        }
    }

    fn keep_highest(&mut self, day: NaiveDate, phase: Phase) {
        let slot = self.map.entry(date_key(day)).or_insert(phase);
        if phase.priority() > slot.priority() {
            *slot = phase;
        }
    }
}

/// Move a date by whole days; `None` past the representable calendar.
fn shift(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|d| date.checked_add_signed(d))
}

/// `length` consecutive days from `start`, skipping unrepresentable ones.
fn span(start: NaiveDate, length: i64) -> impl Iterator<Item = NaiveDate> {
    (0..length.max(0)).filter_map(move |offset| shift(start, offset))
}

/// Mean rounded half up, `None` for an empty slice.
fn rounded_mean(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<i64>() as f64 / values.len() as f64;
    Some((mean + 0.5).floor() as i64)
}
