use chrono::Timelike;
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    #[serde(rename = "atMinutesOfDay", alias = "at")]
    pub at_minutes_of_day: u16,
    #[serde(rename = "targetTemperature", alias = "temp")]
    pub target_temperature: f32,
}

impl ScheduleEntry {
    pub fn new(at_minutes_of_day: u16, target_temperature: f32) -> Self {
        Self {
            at_minutes_of_day,
            target_temperature,
        }
    }

    pub fn validate(&self) -> bool {
        self.at_minutes_of_day < MINUTES_PER_DAY
    }
}

pub fn minutes_of_day<T: Timelike>(time: &T) -> u16 {
    (time.hour() * 60 + time.minute()) as u16
}

/// Entries in ascending time order. The sort is stable, so entries sharing a
/// time keep their input order and the later one ends up last.
fn sorted(entries: &[ScheduleEntry]) -> Vec<&ScheduleEntry> {
    let mut sorted: Vec<&ScheduleEntry> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.at_minutes_of_day);
    sorted
}

/// Resolves the scheduled setpoint active at `now_minutes`.
///
/// Picks the latest entry at or before now. Before the first entry of the
/// day the schedule wraps, so the last entry of the previous day still
/// applies. An empty schedule yields `fallback`.
pub fn resolve(entries: &[ScheduleEntry], now_minutes: u16, fallback: f32) -> f32 {
    let sorted = sorted(entries);

    let current = sorted
        .iter()
        .rev()
        .find(|entry| entry.at_minutes_of_day <= now_minutes)
        .or_else(|| sorted.last());

    current
        .map(|entry| entry.target_temperature)
        .unwrap_or(fallback)
}

/// Minute of day at which the resolved setpoint next changes, wrapping to
/// tomorrow's first entry.
pub fn next_change(entries: &[ScheduleEntry], now_minutes: u16) -> Option<u16> {
    let sorted = sorted(entries);

    sorted
        .iter()
        .find(|entry| entry.at_minutes_of_day > now_minutes)
        .or_else(|| sorted.first())
        .map(|entry| entry.at_minutes_of_day)
}
