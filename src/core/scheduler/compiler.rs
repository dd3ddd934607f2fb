//! Schedule compiler: turns a task's human-entered recurrence into a
//! [`TriggerRule`] the engine can evaluate.
//!
//! Compilation is pure; evaluating a rule only needs the instant to search
//! from and the [`ScheduleZone`] wall clock the rule is expressed in.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::core::store::{ScheduleType, ScheduledTask};

/// How far ahead `next_after` searches. Covers the longest monthly gap.
const MAX_LOOKAHEAD_DAYS: i64 = 400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Invalid time format '{0}': expected HH:MM with hour 0-23 and minute 0-59")]
    InvalidTimeFormat(String),
    #[error("Invalid schedule: {0}")]
    InvalidScheduleSpec(String),
}

/// Wall clock that schedule times are interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleZone {
    /// Server local time.
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    fn naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Compiled "when to fire" for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRule {
    /// Once per calendar day.
    Daily { at: TimeOfDay },
    /// Once per week on the given weekday.
    Weekly { weekday: Weekday, at: TimeOfDay },
    /// Once per month. Days past the end of a short month fire on its last day.
    Monthly { day: u32, at: TimeOfDay },
}

impl std::fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily { at } => write!(f, "daily at {at}"),
            Self::Weekly { weekday, at } => write!(f, "weekly on {weekday} at {at}"),
            Self::Monthly { day, at } => write!(f, "monthly on day {day} at {at}"),
        }
    }
}

impl TriggerRule {
    pub fn time_of_day(&self) -> TimeOfDay {
        match self {
            Self::Daily { at } | Self::Weekly { at, .. } | Self::Monthly { at, .. } => *at,
        }
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily { .. } => true,
            Self::Weekly { weekday, .. } => date.weekday() == *weekday,
            Self::Monthly { day, .. } => date.day() == (*day).min(last_day_of_month(date)),
        }
    }

    /// First firing instant strictly after `after`, on `after`'s wall clock.
    ///
    /// Local times skipped by a DST jump fire one hour later; repeated local
    /// times fire on their first occurrence.
    pub fn next_after_in<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let time = self.time_of_day().naive()?;
        let start = after.date_naive();

        for offset in 0..=MAX_LOOKAHEAD_DAYS {
            let date = start + Duration::days(offset);
            if !self.matches_date(date) {
                continue;
            }
            let wall = date.and_time(time);
            let candidate = tz
                .from_local_datetime(&wall)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(wall + Duration::hours(1))).earliest());
            if let Some(instant) = candidate
                && instant > *after
            {
                return Some(instant);
            }
        }
        None
    }

    pub fn next_after(&self, after: DateTime<Utc>, zone: ScheduleZone) -> Option<DateTime<Utc>> {
        match zone {
            ScheduleZone::Utc => self.next_after_in(&after),
            ScheduleZone::Local => self
                .next_after_in(&after.with_timezone(&Local))
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Parse `HH:MM` (24-hour). Single-digit fields such as `9:5` are accepted.
pub fn parse_time_of_day(raw: &str) -> Result<TimeOfDay, CompileError> {
    let invalid = || CompileError::InvalidTimeFormat(raw.to_string());
    let mut fields = raw.split(':');
    let (Some(hour), Some(minute), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(invalid());
    };
    let hour = parse_clock_field(hour).filter(|h| *h <= 23).ok_or_else(invalid)?;
    let minute = parse_clock_field(minute)
        .filter(|m| *m <= 59)
        .ok_or_else(invalid)?;
    Ok(TimeOfDay { hour, minute })
}

fn parse_clock_field(field: &str) -> Option<u32> {
    if field.is_empty() || field.len() > 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Day-of-week numbering: 1 = Monday ... 7 = Sunday, with 0 also meaning Sunday.
fn weekday_from_number(day: i64) -> Option<Weekday> {
    match day {
        0 | 7 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

pub fn compile(
    schedule_type: ScheduleType,
    schedule_time: &str,
    schedule_day: Option<i64>,
) -> Result<TriggerRule, CompileError> {
    let at = parse_time_of_day(schedule_time)?;
    match schedule_type {
        ScheduleType::Daily => Ok(TriggerRule::Daily { at }),
        ScheduleType::Weekly => {
            let day = schedule_day.ok_or_else(|| {
                CompileError::InvalidScheduleSpec("weekly schedule needs schedule_day".to_string())
            })?;
            let weekday = weekday_from_number(day).ok_or_else(|| {
                CompileError::InvalidScheduleSpec(format!(
                    "weekly schedule_day must be 0-7, got {day}"
                ))
            })?;
            Ok(TriggerRule::Weekly { weekday, at })
        }
        ScheduleType::Monthly => {
            let day = schedule_day.ok_or_else(|| {
                CompileError::InvalidScheduleSpec("monthly schedule_day is required".to_string())
            })?;
            if !(1..=31).contains(&day) {
                return Err(CompileError::InvalidScheduleSpec(format!(
                    "monthly schedule_day must be 1-31, got {day}"
                )));
            }
            Ok(TriggerRule::Monthly {
                day: day as u32,
                at,
            })
        }
    }
}

pub fn compile_task(task: &ScheduledTask) -> Result<TriggerRule, CompileError> {
    compile(task.schedule_type, &task.schedule_time, task.schedule_day)
}
