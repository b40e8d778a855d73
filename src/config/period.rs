//! Recurring wall-clock trigger points for scheduled refresh.
//!
//! A [`Period`] names a minute of the day, optionally pinned to a weekday.
//! It carries no state: every call to [`Period::is_due`] re-reads the clock.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// Error returned when a period is built from out-of-range values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("hour {0} is out of range (0-23)")]
    Hour(u32),
    #[error("minute {0} is out of range (0-59)")]
    Minute(u32),
}

/// A daily or weekly point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Only consulted when `weekly` is set.
    pub day_of_week: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub weekly: bool,
}

impl Period {
    /// Every day at `hour:minute` local time.
    pub fn daily(hour: u32, minute: u32) -> Result<Self, PeriodError> {
        Self::checked(Weekday::Mon, hour, minute, false)
    }

    /// Every `day` at `hour:minute` local time.
    pub fn weekly(day: Weekday, hour: u32, minute: u32) -> Result<Self, PeriodError> {
        Self::checked(day, hour, minute, true)
    }

    fn checked(day_of_week: Weekday, hour: u32, minute: u32, weekly: bool) -> Result<Self, PeriodError> {
        if hour > 23 {
            return Err(PeriodError::Hour(hour));
        }
        if minute > 59 {
            return Err(PeriodError::Minute(minute));
        }
        Ok(Self { day_of_week, hour, minute, weekly })
    }

    /// True while the local wall clock sits inside this period's minute.
    pub fn is_due(&self) -> bool {
        self.is_due_at(&Local::now())
    }

    /// Same check against an explicit instant.
    pub fn is_due_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if now.hour() != self.hour || now.minute() != self.minute {
            return false;
        }
        !self.weekly || now.weekday() == self.day_of_week
    }
}

impl Default for Period {
    /// Daily at 03:00.
    fn default() -> Self {
        Self {
            day_of_week: Weekday::Sun,
            hour: 3,
            minute: 0,
            weekly: false,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.weekly {
            write!(f, "every {} at {:02}:{:02}", self.day_of_week, self.hour, self.minute)
        } else {
            write!(f, "daily at {:02}:{:02}", self.hour, self.minute)
        }
    }
}
