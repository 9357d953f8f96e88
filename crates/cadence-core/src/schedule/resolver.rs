//! Temporal constraint resolver.
//!
//! Pure forward search in the recipient's local time. Each pass checks the
//! constraints in a fixed order and, on the first violation, jumps the
//! candidate to the earliest moment that could clear it, then starts over.
//!
//! 1. working day and working-hour window
//! 2. holiday calendar
//! 3. quiet windows (plus buffer) and the holy-period sunset blackout
//! 4. preferred weekdays
//! 5. preferred hours
//!
//! Steps 1-3 are hard constraints; URGENT skips 4-5. Every jump moves strictly
//! forward, and the search is capped by iteration count and horizon, after
//! which the next plain working window is used.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConstraintConfig, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverLimits {
    pub max_iterations: u32,
    pub horizon_days: u32,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            horizon_days: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveOptions {
    pub priority: Priority,
    /// URGENT only: keep a candidate that already sits inside the working
    /// window on a working day, even if it hits a holiday or quiet window.
    pub bypass_hard_constraints: bool,
}

impl ResolveOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            bypass_hard_constraints: false,
        }
    }

    pub fn bypassing_hard_constraints(mut self) -> Self {
        self.bypass_hard_constraints = true;
        self
    }
}

/// Resolved send time plus search diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub at: DateTime<Utc>,
    pub iterations: u32,
    pub fell_back: bool,
    /// The URGENT bypass kept the candidate as-is.
    pub bypassed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    limits: ResolverLimits,
}

impl Resolver {
    pub fn new(limits: ResolverLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ResolverLimits {
        self.limits
    }

    /// Earliest moment `>= candidate` satisfying `config`.
    pub fn resolve(
        &self,
        candidate: DateTime<Utc>,
        config: &ConstraintConfig,
        priority: Priority,
    ) -> DateTime<Utc> {
        self.resolve_with(candidate, config, ResolveOptions::new(priority))
            .at
    }

    pub fn resolve_with(
        &self,
        candidate: DateTime<Utc>,
        config: &ConstraintConfig,
        options: ResolveOptions,
    ) -> Resolution {
        let local = LocalFrame::new(config);
        let start = local.to_local(candidate);
        let urgent = options.priority == Priority::Urgent;

        if urgent && options.bypass_hard_constraints && in_working_window(start, config) {
            return Resolution {
                at: candidate,
                iterations: 0,
                fell_back: false,
                bypassed: true,
            };
        }

        let horizon = start + Duration::days(i64::from(self.limits.horizon_days));
        let mut t = start;
        let mut iterations = 0;

        while iterations < self.limits.max_iterations && t <= horizon {
            iterations += 1;
            match first_violation(t, config, urgent) {
                None => {
                    return Resolution {
                        at: local.to_utc(t).max(candidate),
                        iterations,
                        fell_back: false,
                        bypassed: false,
                    };
                }
                Some(next) => t = next,
            }
        }

        let fallback = if in_working_window(start, config) {
            start
        } else {
            next_window_start(start, config)
        };
        tracing::warn!(
            %candidate,
            iterations,
            "no send time satisfies all constraints within bound; using next working window"
        );
        Resolution {
            at: local.to_utc(fallback).max(candidate),
            iterations,
            fell_back: true,
            bypassed: false,
        }
    }

    /// Hard constraints only (steps 1-3). Used to re-validate at send time.
    pub fn satisfies_hard_constraints(at: DateTime<Utc>, config: &ConstraintConfig) -> bool {
        let t = LocalFrame::new(config).to_local(at);
        in_working_window(t, config)
            && !config.is_holiday(t.date())
            && quiet_violation(t, config).is_none()
    }
}

/// Converts between UTC and the recipient's wall clock.
struct LocalFrame {
    offset: Duration,
}

impl LocalFrame {
    fn new(config: &ConstraintConfig) -> Self {
        Self {
            offset: Duration::seconds(i64::from(config.offset().local_minus_utc())),
        }
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc() + self.offset
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        (local - self.offset).and_utc()
    }
}

fn first_violation(
    t: NaiveDateTime,
    config: &ConstraintConfig,
    skip_preferences: bool,
) -> Option<NaiveDateTime> {
    let date = t.date();

    if !in_working_window(t, config) {
        return Some(next_window_start(t, config));
    }
    if config.is_holiday(date) {
        return Some(day_start(date.succ_opt()?, config));
    }
    if let Some(clear_at) = quiet_violation(t, config) {
        return Some(clear_at);
    }
    if skip_preferences {
        return None;
    }

    let rules = config.rules_for(date);
    if !rules.preferred_days.is_empty() && !rules.preferred_days.contains(&date.weekday()) {
        let next = (1..=7)
            .filter_map(|n| date.checked_add_signed(Duration::days(n)))
            .find(|d| config.rules_for(*d).preferred_days.contains(&d.weekday()))
            .or_else(|| date.succ_opt())?;
        return Some(day_start(next, config));
    }
    if !rules.preferred_hours.is_empty() && !rules.preferred_hours.contains(&t.hour()) {
        let later_today = rules
            .preferred_hours
            .iter()
            .copied()
            .filter(|h| *h > t.hour())
            .min();
        return match later_today {
            Some(hour) => Some(date.and_time(hour_time(hour))),
            None => {
                let next = date.succ_opt()?;
                let first = config
                    .rules_for(next)
                    .preferred_hours
                    .iter()
                    .copied()
                    .min()
                    .unwrap_or(0);
                Some(next.and_time(hour_time(first)))
            }
        };
    }
    None
}

fn in_working_window(t: NaiveDateTime, config: &ConstraintConfig) -> bool {
    config.is_working_day(t.weekday()) && config.rules_for(t.date()).window.contains(t.time())
}

/// Earliest window start strictly after `t`'s position, or `t` itself when
/// already inside a window.
fn next_window_start(t: NaiveDateTime, config: &ConstraintConfig) -> NaiveDateTime {
    let mut date = t.date();
    for _ in 0..=8 {
        if config.is_working_day(date.weekday()) {
            let window = config.rules_for(date).window;
            let start = date.and_time(window.start_time());
            if t < start {
                return start;
            }
            if window.contains(t.time()) && date == t.date() {
                return t;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    // No working day in the week (unvalidated config): creep forward a day.
    t + Duration::days(1)
}

fn day_start(date: NaiveDate, config: &ConstraintConfig) -> NaiveDateTime {
    date.and_time(config.rules_for(date).window.start_time())
}

fn hour_time(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN)
}

/// If `t` falls inside a blocked interval, the moment it clears.
fn quiet_violation(t: NaiveDateTime, config: &ConstraintConfig) -> Option<NaiveDateTime> {
    let mut blocked: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
    let date = t.date();

    if config.avoid_quiet_windows {
        let buffer = Duration::minutes(i64::from(config.quiet_buffer_minutes));
        // Yesterday's window may spill past midnight.
        for day in [date.pred_opt(), Some(date)].into_iter().flatten() {
            for window in &config.quiet_windows {
                let start = day.and_time(window.start);
                let end_day = if window.end > window.start {
                    Some(day)
                } else {
                    day.succ_opt()
                };
                if let Some(end_day) = end_day {
                    blocked.push((start - buffer, end_day.and_time(window.end) + buffer));
                }
            }
        }
    }

    if let Some(period) = config.holy_period_on(date) {
        let sunset = date.and_time(period.sunset);
        blocked.push((
            sunset - Duration::minutes(i64::from(period.sunset_exclusion_before_minutes)),
            sunset + Duration::minutes(i64::from(period.sunset_exclusion_after_minutes)),
        ));
    }

    blocked
        .into_iter()
        .filter(|(start, end)| *start <= t && t < *end)
        .map(|(_, end)| end)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HolyPeriod, HourRange, QuietWindow};
    use chrono::{TimeZone, Weekday};
    use rstest::rstest;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn resolver() -> Resolver {
        Resolver::default()
    }

    // 2025-03-03 is a Monday.

    #[rstest]
    #[case::inside_window(utc(2025, 3, 3, 10, 0), utc(2025, 3, 3, 10, 0))]
    #[case::before_window(utc(2025, 3, 3, 6, 30), utc(2025, 3, 3, 9, 0))]
    #[case::after_window(utc(2025, 3, 3, 17, 0), utc(2025, 3, 4, 9, 0))]
    #[case::friday_evening(utc(2025, 3, 7, 18, 0), utc(2025, 3, 10, 9, 0))]
    #[case::saturday(utc(2025, 3, 8, 11, 0), utc(2025, 3, 10, 9, 0))]
    fn default_window(#[case] candidate: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
        let config = ConstraintConfig::default();
        assert_eq!(resolver().resolve(candidate, &config, Priority::Normal), expected);
    }

    #[test]
    fn local_offset_shifts_window() {
        // Sunday 05:00 UTC = 08:00 local (+03:00), Sunday is a working day.
        let config = ConstraintConfig::gulf();
        let resolved = resolver().resolve(utc(2025, 3, 2, 5, 0), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 2, 6, 0));
    }

    #[test]
    fn quiet_window_pushes_past_end_plus_buffer() {
        // 12:10 local sits in dhuhr (12:00-12:30), clear at 12:45 local.
        let config = ConstraintConfig::gulf();
        let resolved = resolver().resolve(utc(2025, 3, 2, 9, 10), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 2, 9, 45));
    }

    #[test]
    fn buffer_applies_before_window_start() {
        // 11:50 local is within the 15 minute lead-in to dhuhr.
        let config = ConstraintConfig::gulf();
        let resolved = resolver().resolve(utc(2025, 3, 2, 8, 50), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 2, 9, 45));
    }

    #[test]
    fn quiet_windows_ignored_when_avoidance_disabled() {
        let mut config = ConstraintConfig::gulf();
        config.avoid_quiet_windows = false;
        let candidate = utc(2025, 3, 2, 9, 10);
        assert_eq!(resolver().resolve(candidate, &config, Priority::Normal), candidate);
    }

    #[test]
    fn holiday_moves_to_next_day() {
        let mut config = ConstraintConfig::default();
        config
            .holidays
            .insert(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        let resolved = resolver().resolve(utc(2025, 3, 3, 10, 0), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 4, 9, 0));
    }

    #[test]
    fn preferred_days_and_hours() {
        let mut config = ConstraintConfig::default();
        config.preferred_days = vec![Weekday::Wed];
        config.preferred_hours = vec![10, 14];

        // Monday 11:00 -> Wednesday 09:00 -> Wednesday 10:00.
        let resolved = resolver().resolve(utc(2025, 3, 3, 11, 0), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 5, 10, 0));

        // Wednesday 11:30 -> 14:00 same day.
        let resolved = resolver().resolve(utc(2025, 3, 5, 11, 30), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 5, 14, 0));
    }

    #[test]
    fn urgent_skips_preferences() {
        let mut config = ConstraintConfig::default();
        config.preferred_days = vec![Weekday::Wed];
        let candidate = utc(2025, 3, 3, 11, 0);
        assert_eq!(resolver().resolve(candidate, &config, Priority::Urgent), candidate);
    }

    #[test]
    fn urgent_outside_hours_lands_clear_of_quiet_window() {
        let mut config = ConstraintConfig::gulf();
        config.quiet_windows = vec![QuietWindow::new("fajr-late", time(8, 50), time(9, 10))];

        // Saturday 20:00 local -> Sunday 09:00 local is inside 08:35-09:25.
        let resolved = resolver().resolve(utc(2025, 3, 1, 17, 0), &config, Priority::Urgent);
        assert_eq!(resolved, utc(2025, 3, 2, 6, 25));
        assert!(Resolver::satisfies_hard_constraints(resolved, &config));
    }

    #[test]
    fn urgent_bypass_keeps_in_window_candidate() {
        let config = ConstraintConfig::gulf();
        let candidate = utc(2025, 3, 2, 9, 10); // inside dhuhr
        let options = ResolveOptions::new(Priority::Urgent).bypassing_hard_constraints();
        let resolution = resolver().resolve_with(candidate, &config, options);
        assert_eq!(resolution.at, candidate);
        assert!(resolution.bypassed);

        // Outside the window the bypass does nothing.
        let night = utc(2025, 3, 2, 20, 0);
        let resolution = resolver().resolve_with(night, &config, options);
        assert!(resolution.at > night);
    }

    #[test]
    fn holy_period_narrows_window_and_blocks_sunset() {
        let mut config = ConstraintConfig::default();
        config.holy_period = Some(HolyPeriod {
            name: "ramadan".into(),
            start: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 3, 30).unwrap(),
            preferred_days: Vec::new(),
            preferred_hours: Vec::new(),
            working_hours: Some(HourRange::new(10, 18)),
            sunset: time(17, 0),
            sunset_exclusion_before_minutes: 60,
            sunset_exclusion_after_minutes: 60,
        });

        // 09:30 is before the tightened window.
        let resolved = resolver().resolve(utc(2025, 3, 3, 9, 30), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 3, 10, 0));

        // 16:15 is inside the sunset blackout (16:00-18:00), which runs past
        // the window end, so the next day opens.
        let resolved = resolver().resolve(utc(2025, 3, 3, 16, 15), &config, Priority::Normal);
        assert_eq!(resolved, utc(2025, 3, 4, 10, 0));
    }

    #[test]
    fn adversarial_config_falls_back_and_terminates() {
        let mut config = ConstraintConfig::default();
        let mut day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        while day.year() == 2025 {
            config.holidays.insert(day);
            day = day.succ_opt().unwrap();
        }
        config.quiet_windows = vec![QuietWindow::new("always", time(0, 0), time(23, 59))];

        let candidate = utc(2025, 3, 3, 3, 0);
        let resolution = resolver().resolve_with(candidate, &config, ResolveOptions::default());
        assert!(resolution.fell_back);
        assert!(resolution.iterations <= ResolverLimits::default().max_iterations);
        assert_eq!(resolution.at, utc(2025, 3, 3, 9, 0));
    }

    #[test]
    fn never_earlier_than_candidate() {
        let configs = [ConstraintConfig::default(), ConstraintConfig::gulf()];
        let mut candidate = utc(2025, 3, 1, 0, 7);
        for _ in 0..200 {
            for config in &configs {
                for priority in [Priority::Low, Priority::Urgent] {
                    let resolved = resolver().resolve(candidate, config, priority);
                    assert!(resolved >= candidate, "{resolved} < {candidate}");
                }
            }
            candidate += Duration::minutes(53);
        }
    }

    #[test]
    fn resolved_times_satisfy_hard_constraints() {
        let config = ConstraintConfig::gulf();
        let mut candidate = utc(2025, 3, 1, 0, 0);
        for _ in 0..150 {
            let resolution = resolver().resolve_with(candidate, &config, ResolveOptions::default());
            assert!(!resolution.fell_back);
            assert!(Resolver::satisfies_hard_constraints(resolution.at, &config));
            candidate += Duration::minutes(47);
        }
    }
}
