//! Weekly schedule gate
//!
//! Answers "may the worker fetch right now?" from a set of weekly hour
//! windows, evaluated in UTC.

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

pub trait Schedule: Send + Sync {
    fn permits(&self, at: OffsetDateTime) -> bool;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule window {0:?} must look like \"<days> <from>-<to>\"")]
    Syntax(String),

    #[error("unknown day {0:?}")]
    Day(String),

    #[error("bad hour range {0:?}")]
    Hours(String),
}

const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const FULL_DAY: u32 = (1 << 24) - 1;

/// One 24-bit hour mask per weekday, Monday first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekSchedule {
    hours: [u32; 7],
}

impl WeekSchedule {
    pub fn always() -> Self {
        Self { hours: [FULL_DAY; 7] }
    }

    /// Build from windows such as `"mon-fri 22-6"` or `"* 0-24"`
    ///
    /// `from > to` wraps past midnight into the following day and must cover
    /// some hours on both days. No windows at all means always permitted.
    pub fn parse<S: AsRef<str>>(windows: &[S]) -> Result<Self, ScheduleError> {
        if windows.is_empty() {
            return Ok(Self::always());
        }
        let mut schedule = Self { hours: [0; 7] };
        for window in windows {
            schedule.add_window(window.as_ref())?;
        }
        Ok(schedule)
    }

    fn add_window(&mut self, window: &str) -> Result<(), ScheduleError> {
        let syntax = || ScheduleError::Syntax(window.to_string());
        let mut parts = window.split_whitespace();
        let (Some(days), Some(hours), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(syntax());
        };

        let (from, to) = hours.split_once('-').ok_or_else(syntax)?;
        let bad_hours = || ScheduleError::Hours(hours.to_string());
        let from: u32 = from.parse().map_err(|_| bad_hours())?;
        let to: u32 = to.parse().map_err(|_| bad_hours())?;
        if from > 24 || to > 24 || from == to {
            return Err(bad_hours());
        }
        // A wrap has to keep some hours on both days
        if from > to && (from == 24 || to == 0) {
            return Err(bad_hours());
        }

        for day in parse_days(days)? {
            if from < to {
                self.hours[day] |= span(from, to);
            } else {
                self.hours[day] |= span(from, 24);
                self.hours[(day + 1) % 7] |= span(0, to);
            }
        }
        Ok(())
    }
}

/// Hour bits `[from, to)`
fn span(from: u32, to: u32) -> u32 {
    ((1u64 << to) - (1u64 << from)) as u32
}

fn day_index(name: &str) -> Result<usize, ScheduleError> {
    DAYS.iter()
        .position(|d| name.eq_ignore_ascii_case(d))
        .ok_or_else(|| ScheduleError::Day(name.to_string()))
}

fn parse_days(days: &str) -> Result<Vec<usize>, ScheduleError> {
    if days == "*" {
        return Ok((0..7).collect());
    }
    let Some((first, last)) = days.split_once('-') else {
        return Ok(vec![day_index(days)?]);
    };
    let (first, last) = (day_index(first)?, day_index(last)?);
    let len = (last + 7 - first) % 7 + 1;
    Ok((0..len).map(|i| (first + i) % 7).collect())
}

impl Schedule for WeekSchedule {
    fn permits(&self, at: OffsetDateTime) -> bool {
        let at = at.to_offset(UtcOffset::UTC);
        let day = at.weekday().number_days_from_monday() as usize;
        self.hours[day] & (1 << at.hour()) != 0
    }
}
