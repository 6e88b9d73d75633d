//! # Temporal Types — Calendar Months and UTC Timestamps
//!
//! ## `Month`
//!
//! The natural key of a settlement. Internally a `NaiveDate` pinned to the
//! first day of the month, so equality, ordering and hashing are
//! calendar-correct. Serializes as `YYYY-MM`.
//!
//! Two views of the month are needed:
//!
//! - **Day view** (`first_day()..=last_day()`) for subscription proration,
//!   which works on whole calendar days.
//! - **Instant view** (`start_instant()..end_instant()`, half-open, UTC) for
//!   engagement events, which carry timestamps.
//!
//! ## `Timestamp`
//!
//! UTC-only, truncated to seconds. Used for `finalized_at` and withdrawal
//! receipts so that digests over them are stable.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A calendar month, stored as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month(NaiveDate);

impl Month {
    /// Construct from a year and a 1-based month number.
    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidMonth(format!("{year:04}-{month:02}")))
    }

    /// The month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        // Day 1 of an existing date's month always exists.
        Self(date.with_day(1).unwrap_or(date))
    }

    /// The month containing the current UTC instant.
    pub fn current() -> Self {
        Self::containing(Utc::now().date_naive())
    }

    /// Parse `YYYY-MM` (a trailing `-01` day is tolerated).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        let head = trimmed.strip_suffix("-01").filter(|h| h.len() == 7).unwrap_or(trimmed);
        let (year, month) = head
            .split_once('-')
            .ok_or_else(|| CoreError::InvalidMonth(s.to_string()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| CoreError::InvalidMonth(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| CoreError::InvalidMonth(s.to_string()))?;
        Self::new(year, month).map_err(|_| CoreError::InvalidMonth(s.to_string()))
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// 1-based month number.
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// First calendar day of the month.
    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// Last calendar day of the month.
    pub fn last_day(&self) -> NaiveDate {
        self.next().0.pred_opt().unwrap_or(self.0)
    }

    /// Number of days in the month (28..=31).
    pub fn days(&self) -> u32 {
        self.last_day().day()
    }

    /// Whether `date` falls within this month.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.first_day() && date <= self.last_day()
    }

    /// Inclusive start of the month as a UTC instant (00:00:00 on day 1).
    pub fn start_instant(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.0.and_time(chrono::NaiveTime::MIN))
    }

    /// Exclusive end of the month as a UTC instant (00:00:00 on day 1 of the
    /// following month).
    pub fn end_instant(&self) -> DateTime<Utc> {
        self.next().start_instant()
    }

    /// Whether `instant` falls within `[start_instant, end_instant)`.
    pub fn contains_instant(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start_instant() && *instant < self.end_instant()
    }

    /// The following month.
    pub fn next(&self) -> Self {
        Self(self.0.checked_add_months(Months::new(1)).unwrap_or(self.0))
    }

    /// The preceding month.
    pub fn prev(&self) -> Self {
        Self(self.0.checked_sub_months(Months::new(1)).unwrap_or(self.0))
    }

    /// Render as `YYYY-MM`.
    pub fn to_key(&self) -> String {
        format!("{:04}-{:02}", self.year(), self.month())
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl FromStr for Month {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_key())
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// From a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse an RFC 3339 string; only the `Z` suffix is accepted.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if !s.ends_with('Z') {
            return Err(CoreError::InvalidTimestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| CoreError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Render as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> Month {
        Month::new(y, m).unwrap()
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(month(2024, 2).days(), 29);
        assert_eq!(month(2025, 2).days(), 28);
        assert_eq!(month(2026, 4).days(), 30);
        assert_eq!(month(2026, 12).days(), 31);
    }

    #[test]
    fn last_day_of_december_rolls_year() {
        let dec = month(2025, 12);
        assert_eq!(dec.last_day(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(dec.next(), month(2026, 1));
        assert_eq!(month(2026, 1).prev(), dec);
    }

    #[test]
    fn parse_accepts_month_key_and_first_day() {
        assert_eq!(Month::parse("2026-03").unwrap(), month(2026, 3));
        assert_eq!(Month::parse("2026-03-01").unwrap(), month(2026, 3));
        assert_eq!("2026-11".parse::<Month>().unwrap(), month(2026, 11));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Month::parse("2026").is_err());
        assert!(Month::parse("2026-13").is_err());
        assert!(Month::parse("2026-00").is_err());
        assert!(Month::parse("march").is_err());
        assert!(Month::parse("2026-03-15").is_err());
    }

    #[test]
    fn instant_window_is_half_open() {
        let m = month(2026, 1);
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let last_second = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap();
        let next_start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert!(m.contains_instant(&start));
        assert!(m.contains_instant(&last_second));
        assert!(!m.contains_instant(&next_start));
        assert_eq!(m.end_instant(), next_start);
    }

    #[test]
    fn containing_pins_to_first_day() {
        let d = NaiveDate::from_ymd_opt(2026, 7, 19).unwrap();
        assert_eq!(Month::containing(d), month(2026, 7));
        assert!(month(2026, 7).contains_date(d));
        assert!(!month(2026, 8).contains_date(d));
    }

    #[test]
    fn serde_uses_month_key() {
        let json = serde_json::to_string(&month(2026, 5)).unwrap();
        assert_eq!(json, "\"2026-05\"");
        let back: Month = serde_json::from_str(&json).unwrap();
        assert_eq!(back, month(2026, 5));
    }

    #[test]
    fn timestamp_truncates_and_rejects_offsets() {
        let ts = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        assert_eq!(ts.to_iso8601(), "2026-01-15T12:00:00Z");
        assert!(Timestamp::parse("2026-01-15T12:00:00+05:00").is_err());
        assert_eq!(Timestamp::now().as_datetime().nanosecond(), 0);
    }
}
