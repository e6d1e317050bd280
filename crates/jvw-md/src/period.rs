//! Calendar-month primitives shared by ingest, storage and analytics.
//!
//! Every observation in the store is keyed by the first day of its month.
//! [`Month`] is that key; [`Window`] is an inclusive range of months.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("month out of range: {0}")]
    MonthOutOfRange(u32),
    #[error("year out of range: {0}")]
    YearOutOfRange(i32),
    #[error("cannot parse month from '{0}' (expected YYYY-MM)")]
    Unparseable(String),
    #[error("window start {start} is after end {end}")]
    InvertedWindow { start: Month, end: Month },
}

/// A calendar month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        // Keep first_day() infallible for every constructible Month.
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(PeriodError::YearOutOfRange(year));
        }
        Ok(Self { year, month })
    }

    /// Truncate a date to its month.
    pub fn from_date(d: NaiveDate) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First calendar day of the month (the canonical `period_date`).
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
    }

    /// Months since year 0; used for calendar arithmetic.
    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ord: i64) -> Option<Self> {
        let year = i32::try_from(ord.div_euclid(12)).ok()?;
        let month = u32::try_from(ord.rem_euclid(12) + 1).ok()?;
        Month::new(year, month).ok()
    }

    /// Shift by `n` calendar months (negative goes back).
    pub fn offset(&self, n: i64) -> Option<Self> {
        Self::from_ordinal(self.ordinal().checked_add(n)?)
    }

    pub fn pred(&self) -> Option<Self> {
        self.offset(-1)
    }

    pub fn succ(&self) -> Option<Self> {
        self.offset(1)
    }

    /// Number of calendar months from `self` to `later` (negative if earlier).
    pub fn months_until(&self, later: &Month) -> i64 {
        later.ordinal() - self.ordinal()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = PeriodError;

    /// Accepts `YYYY-MM` or a full `YYYY-MM-DD` date (truncated).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Month::from_date(d));
        }
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| PeriodError::Unparseable(s.to_string()))?;
        if y.len() != 4 || m.is_empty() || m.len() > 2 {
            return Err(PeriodError::Unparseable(s.to_string()));
        }
        let year: i32 = y
            .parse()
            .map_err(|_| PeriodError::Unparseable(s.to_string()))?;
        let month: u32 = m
            .parse()
            .map_err(|_| PeriodError::Unparseable(s.to_string()))?;
        Month::new(year, month)
    }
}

impl Serialize for Month {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive `[start, end]` range of months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    start: Month,
    end: Month,
}

impl Window {
    pub fn new(start: Month, end: Month) -> Result<Self, PeriodError> {
        if start > end {
            return Err(PeriodError::InvertedWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Month {
        self.start
    }

    pub fn end(&self) -> Month {
        self.end
    }

    pub fn contains(&self, m: Month) -> bool {
        self.start <= m && m <= self.end
    }

    /// Number of months covered (always >= 1).
    pub fn len_months(&self) -> i64 {
        self.start.months_until(&self.end) + 1
    }

    /// Restrict `self` to `bounds`. `None` when the two do not overlap.
    pub fn clamp_to(&self, bounds: &Window) -> Option<Window> {
        let start = self.start.max(bounds.start);
        let end = self.end.min(bounds.end);
        Window::new(start, end).ok()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
