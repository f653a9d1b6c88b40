//! Time windows used to scope candidate, winner and history queries.
//!
//! All bounds are inclusive and expressed in UTC. Timestamps produced by
//! [`timestamp_now`] are truncated to microseconds, which is the precision the
//! record store keeps.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// First instant of the month containing `now`, up to `now`.
    pub fn current_month(now: DateTime<Utc>) -> Self {
        Self { start: month_start(now), end: now }
    }

    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        Self { start: now - Duration::days(i64::from(days)), end: now }
    }

    pub fn trailing_months(now: DateTime<Utc>, months: u32) -> Self {
        let start = now.checked_sub_months(Months::new(months)).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    /// The whole calendar month containing `at`, ending one microsecond before the next month.
    pub fn calendar_month_of(at: DateTime<Utc>) -> Self {
        let start = month_start(at);
        let next = start.checked_add_months(Months::new(1)).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end: next - Duration::microseconds(1) }
    }
}

fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(at.year(), at.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(at)
}

/// Caller-supplied bounds; whichever side is absent falls back to the query's default window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl PeriodRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    pub fn resolve(self, defaults: PeriodWindow) -> Result<PeriodWindow, DomainError> {
        PeriodWindow::new(self.start.unwrap_or(defaults.start), self.end.unwrap_or(defaults.end))
    }
}

/// How far the "retract previous winner" step of finalization reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerScope {
    /// One winner across the whole record store.
    #[default]
    Global,
    /// One winner per calendar month of nomination.
    Cycle,
}

impl WinnerScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Cycle => "cycle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Some(Self::Global),
            "cycle" => Some(Self::Cycle),
            _ => None,
        }
    }

    /// Nomination-date window whose winners are retracted when finalizing a nomination
    /// made at `nominated_at`. `None` means every standing winner is retracted.
    pub fn retraction_window(&self, nominated_at: DateTime<Utc>) -> Option<PeriodWindow> {
        match self {
            Self::Global => None,
            Self::Cycle => Some(PeriodWindow::calendar_month_of(nominated_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{PeriodRange, PeriodWindow, WinnerScope};
    use crate::errors::DomainError;

    #[test]
    fn current_month_starts_at_first_day_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 14, 5, 9).single().expect("valid time");
        let window = PeriodWindow::current_month(now);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().expect("t"));
        assert_eq!(window.end, now);
    }

    #[test]
    fn trailing_months_handles_short_months() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 8, 0, 0).single().expect("valid time");
        let window = PeriodWindow::trailing_months(now, 1);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 2, 28, 8, 0, 0).single().expect("t"));
    }

    #[test]
    fn trailing_days_spans_exactly_the_requested_days() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).single().expect("valid time");
        let window = PeriodWindow::trailing_days(now, 31);

        assert_eq!(now - window.start, Duration::days(31));
        assert!(window.contains(window.start));
        assert!(window.contains(now));
        assert!(!window.contains(now + Duration::microseconds(1)));
    }

    #[test]
    fn calendar_month_covers_december_rollover() {
        let at = Utc.with_ymd_and_hms(2026, 12, 24, 18, 30, 0).single().expect("valid time");
        let window = PeriodWindow::calendar_month_of(at);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).single().expect("t"));
        let next_year = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single().expect("t");
        assert_eq!(window.end, next_year - Duration::microseconds(1));
    }

    #[test]
    fn range_overrides_only_supplied_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).single().expect("valid time");
        let defaults = PeriodWindow::trailing_days(now, 31);
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("t");

        let resolved = PeriodRange { start: Some(start), end: None }
            .resolve(defaults)
            .expect("valid range");

        assert_eq!(resolved.start, start);
        assert_eq!(resolved.end, now);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).single().expect("valid time");
        let error = PeriodRange::between(now, now - Duration::days(1))
            .resolve(PeriodWindow::current_month(now))
            .expect_err("start after end");

        assert!(matches!(error, DomainError::InvalidPeriod { .. }));
    }

    #[test]
    fn global_scope_has_no_retraction_window() {
        let at = Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).single().expect("valid time");

        assert_eq!(WinnerScope::Global.retraction_window(at), None);
        assert_eq!(
            WinnerScope::Cycle.retraction_window(at),
            Some(PeriodWindow::calendar_month_of(at))
        );
        assert_eq!(WinnerScope::parse(" Cycle "), Some(WinnerScope::Cycle));
        assert_eq!(WinnerScope::parse("yearly"), None);
    }
}
