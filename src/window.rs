//! Date windows for sync runs and reports.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default lookback when the caller gives no usable dates.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
pub const MIN_LOOKBACK_DAYS: i64 = 1;
pub const MAX_LOOKBACK_DAYS: i64 = 365;

/// Inclusive calendar-day range, interpreted in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SyncWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `lookback_days` days ending at `today`.
    pub fn lookback(today: NaiveDate, lookback_days: i64) -> Self {
        let days = clamp_lookback(lookback_days);
        let start = today
            .checked_sub_days(Days::new(days as u64))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Build a window from raw caller input.
    ///
    /// Explicit dates are used only when both are present, match
    /// `YYYY-MM-DD`, name real days, and are not reversed. Anything else
    /// silently falls back to the lookback window, which itself defaults to
    /// `default_lookback` and is clamped to 1..=365 days.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        lookback_days: Option<i64>,
        default_lookback: i64,
        today: NaiveDate,
    ) -> Self {
        match (start.and_then(parse_date), end.and_then(parse_date)) {
            (Some(start), Some(end)) if start <= end => Self { start, end },
            _ => Self::lookback(today, lookback_days.unwrap_or(default_lookback)),
        }
    }

    /// First instant covered by the window.
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant after the window (exclusive bound).
    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
            .and_utc()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_instant() && at < self.end_instant()
    }
}

impl std::fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

pub fn clamp_lookback(days: i64) -> i64 {
    days.clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS)
}

/// Strict `YYYY-MM-DD`. Shape is checked before chrono sees the string so
/// inputs like `2024-1-5` are rejected rather than leniently accepted.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_explicit_dates_win() {
        let window = SyncWindow::resolve(
            Some("2024-01-01"),
            Some("2024-01-31"),
            Some(7),
            30,
            day("2024-06-15"),
        );
        assert_eq!(window, SyncWindow::new(day("2024-01-01"), day("2024-01-31")));
    }

    #[test]
    fn test_malformed_start_falls_back_to_lookback() {
        let today = day("2024-06-15");
        let window = SyncWindow::resolve(Some("01/01/2024"), Some("2024-01-31"), None, 30, today);
        assert_eq!(window, SyncWindow::new(day("2024-05-16"), today));
    }

    #[test]
    fn test_impossible_or_reversed_dates_fall_back() {
        let today = day("2024-06-15");
        let bad = SyncWindow::resolve(Some("2024-13-45"), Some("2024-01-31"), Some(10), 30, today);
        assert_eq!(bad, SyncWindow::lookback(today, 10));

        let reversed =
            SyncWindow::resolve(Some("2024-02-01"), Some("2024-01-01"), Some(10), 30, today);
        assert_eq!(reversed, SyncWindow::lookback(today, 10));

        let half = SyncWindow::resolve(Some("2024-02-01"), None, Some(10), 30, today);
        assert_eq!(half, SyncWindow::lookback(today, 10));
    }

    #[test]
    fn test_lookback_is_clamped() {
        let today = day("2024-06-15");
        assert_eq!(SyncWindow::lookback(today, 0).start, day("2024-06-14"));
        assert_eq!(SyncWindow::lookback(today, -40).start, day("2024-06-14"));
        assert_eq!(SyncWindow::lookback(today, 10_000).start, day("2023-06-16"));
    }

    #[test]
    fn test_parse_date_is_strict() {
        assert!(parse_date("2024-01-05").is_some());
        assert!(parse_date("2024-1-5").is_none());
        assert!(parse_date("2024-01-05T00:00:00Z").is_none());
        assert!(parse_date("2024-02-30").is_none());
    }

    #[test]
    fn test_instants_are_half_open() {
        let window = SyncWindow::new(day("2024-01-01"), day("2024-01-31"));
        assert!(window.contains(window.start_instant()));
        assert!(!window.contains(window.end_instant()));
        assert_eq!(window.end_instant().date_naive(), day("2024-02-01"));
    }
}
