//! Inclusive UTC calendar-date windows.

use std::sync::OnceLock;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use regex::Regex;

use crate::{Error, Result};

/// Inclusive `[from, to]` date range; an absent bound is unbounded on that side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
        }
    }

    /// Validate `YYYY-MM-DD` bounds as given by a caller.
    ///
    /// `None` and empty strings mean "unbounded". Dates are taken as UTC
    /// calendar days with no timezone conversion.
    pub fn normalize(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        let from = parse_bound(from)?;
        let to = parse_bound(to)?;
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Err(Error::InvalidDateRange { from: f, to: t });
            }
        }
        Ok(Self { from, to })
    }

    /// Whether the UTC calendar date of `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.contains_date(ts.date_naive())
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |f| date >= f) && self.to.map_or(true, |t| date <= t)
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |d: Option<NaiveDate>| d.map_or_else(|| "*".to_string(), |d| d.to_string());
        write!(f, "[{}, {}]", show(self.from), show(self.to))
    }
}

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date regex"))
}

fn parse_bound(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if !date_pattern().is_match(raw) {
        return Err(Error::InvalidDateFormat(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| Error::InvalidDateFormat(raw.to_string()))
}

/// The calendar day before `now`, as seen in timezone `tz`.
pub fn previous_day_in<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    let today = now.with_timezone(tz).date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}
