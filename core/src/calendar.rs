//! Calendar months and the boundary instants the revenue bridge is evaluated at.
//!
//! A month's *end instant* is the last representable nanosecond of its final
//! day. Ledger end dates are the last active day, so a period ending on the
//! month's last day is still active at the end instant.

use crate::error::{MetricsError, MetricsResult};
use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarMonth {
    first: NaiveDate,
}

impl CalendarMonth {
    pub fn new(year: i32, month: u32) -> MetricsResult<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first| Self { first })
            .ok_or_else(|| MetricsError::InvalidMonth {
                raw: format!("{year}-{month}"),
            })
    }

    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            first: date - Days::new(u64::from(date.day0())),
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn last_day(&self) -> NaiveDate {
        self.succ().first - Days::new(1)
    }

    /// Midnight at the start of the first day.
    pub fn start_instant(&self) -> NaiveDateTime {
        self.first.and_time(NaiveTime::MIN)
    }

    /// The last nanosecond of the last day.
    pub fn end_instant(&self) -> NaiveDateTime {
        self.succ().start_instant() - Duration::nanoseconds(1)
    }

    pub fn succ(&self) -> Self {
        Self {
            first: self.first + Months::new(1),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }

    /// Whole months from `earlier` to `self`. Negative when `earlier` is later.
    pub fn months_since(&self, earlier: CalendarMonth) -> i32 {
        (self.year() - earlier.year()) * 12 + (self.month() as i32 - earlier.month() as i32)
    }

    /// Every month from `first` to `last` inclusive, ascending.
    pub fn range(first: CalendarMonth, last: CalendarMonth) -> MetricsResult<Vec<Self>> {
        if last < first {
            return Err(MetricsError::EmptyWindow);
        }
        let mut months = Vec::with_capacity(last.months_since(first) as usize + 1);
        let mut cursor = first;
        while cursor <= last {
            months.push(cursor);
            cursor = cursor.succ();
        }
        Ok(months)
    }

    /// Fails on the first gap or reversal in `months`.
    pub fn ensure_contiguous(months: &[CalendarMonth]) -> MetricsResult<()> {
        for pair in months.windows(2) {
            if pair[0].succ() != pair[1] {
                return Err(MetricsError::NonContiguousMonths {
                    previous: pair[0].to_string(),
                    next: pair[1].to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for CalendarMonth {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MetricsError::InvalidMonth { raw: s.to_string() };
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for CalendarMonth {
    type Error = MetricsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarMonth> for String {
    fn from(month: CalendarMonth) -> Self {
        month.to_string()
    }
}

// ── Lenient parsing for raw inputs ─────────────────────────────────────────

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse a calendar date. Timestamps are truncated to their date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date()))
}

/// Parse a timestamp. Bare dates resolve to midnight; offsets are normalised to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Canonical UTC rendering used for raw and exported timestamps.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
