//! Temporal and cultural sending constraints.
//!
//! Everything here is expressed in the recipient's local time; `utc_offset_minutes`
//! converts to and from UTC.

use std::collections::BTreeSet;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::errors::CadenceError;

/// Half-open hour range `[start, end)`, `end` may be 24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        hour >= self.start && hour < self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time() <= time && time < self.end_time_or_midnight()
    }

    pub fn start_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.start, 0, 0).unwrap_or(NaiveTime::MIN)
    }

    fn end_time_or_midnight(&self) -> NaiveTime {
        if self.end >= 24 {
            // Last representable instant; `contains` is exclusive on the end.
            NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN)
        } else {
            NaiveTime::from_hms_opt(self.end, 0, 0).unwrap_or(NaiveTime::MIN)
        }
    }

    fn validate(&self, field: &str) -> Result<(), CadenceError> {
        if self.start >= self.end || self.end > 24 {
            return Err(CadenceError::Validation(format!(
                "{field}: invalid hour range {}..{}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Recurring daily interval during which nothing may be sent (e.g. prayer time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietWindow {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }
}

/// A multi-week observance that overrides preferences and narrows the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolyPeriod {
    pub name: String,
    /// Inclusive date range.
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub preferred_days: Vec<Weekday>,
    #[serde(default)]
    pub preferred_hours: Vec<u32>,
    /// Tighter working-hour range while the period lasts.
    #[serde(default)]
    pub working_hours: Option<HourRange>,
    pub sunset: NaiveTime,
    #[serde(default = "default_sunset_margin")]
    pub sunset_exclusion_before_minutes: u32,
    #[serde(default = "default_sunset_margin")]
    pub sunset_exclusion_after_minutes: u32,
}

const fn default_sunset_margin() -> u32 {
    60
}

impl HolyPeriod {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Label only; it selects template wording downstream and never affects timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Friendly,
    #[default]
    Neutral,
    Firm,
    Formal,
}

/// The full constraint set a send time is resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    pub utc_offset_minutes: i32,
    pub working_days: Vec<Weekday>,
    pub working_hours: HourRange,
    pub holidays: BTreeSet<NaiveDate>,
    pub quiet_windows: Vec<QuietWindow>,
    pub quiet_buffer_minutes: u32,
    pub avoid_quiet_windows: bool,
    pub preferred_days: Vec<Weekday>,
    pub preferred_hours: Vec<u32>,
    pub holy_period: Option<HolyPeriod>,
    pub tone: Tone,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            working_hours: HourRange::new(9, 17),
            holidays: BTreeSet::new(),
            quiet_windows: Vec::new(),
            quiet_buffer_minutes: 15,
            avoid_quiet_windows: true,
            preferred_days: Vec::new(),
            preferred_hours: Vec::new(),
            holy_period: None,
            tone: Tone::Neutral,
        }
    }
}

/// Rules that apply on one particular local date, after the holy-period
/// override has been folded in.
#[derive(Debug, Clone, Copy)]
pub struct DayRules<'a> {
    pub window: HourRange,
    pub preferred_days: &'a [Weekday],
    pub preferred_hours: &'a [u32],
    pub holy_period: Option<&'a HolyPeriod>,
}

impl ConstraintConfig {
    /// Sunday–Thursday week, UTC+3, midday and afternoon prayer windows.
    pub fn gulf() -> Self {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            utc_offset_minutes: 180,
            working_days: vec![
                Weekday::Sun,
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
            ],
            working_hours: HourRange::new(9, 17),
            quiet_windows: vec![
                QuietWindow::new("dhuhr", t(12, 0), t(12, 30)),
                QuietWindow::new("asr", t(15, 15), t(15, 45)),
            ],
            ..Self::default()
        }
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn is_working_day(&self, weekday: Weekday) -> bool {
        self.working_days.contains(&weekday)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn holy_period_on(&self, date: NaiveDate) -> Option<&HolyPeriod> {
        self.holy_period.as_ref().filter(|p| p.covers(date))
    }

    /// Effective rules for `date`: the holy period (when active) replaces the
    /// preference sets and may tighten the working window.
    pub fn rules_for(&self, date: NaiveDate) -> DayRules<'_> {
        match self.holy_period_on(date) {
            Some(period) => DayRules {
                window: period.working_hours.unwrap_or(self.working_hours),
                preferred_days: &period.preferred_days,
                preferred_hours: &period.preferred_hours,
                holy_period: Some(period),
            },
            None => DayRules {
                window: self.working_hours,
                preferred_days: &self.preferred_days,
                preferred_hours: &self.preferred_hours,
                holy_period: None,
            },
        }
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(CadenceError::Validation(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.working_days.is_empty() {
            return Err(CadenceError::Validation(
                "working_days must not be empty".to_string(),
            ));
        }
        self.working_hours.validate("working_hours")?;
        if let Some(h) = self.preferred_hours.iter().find(|h| **h >= 24) {
            return Err(CadenceError::Validation(format!(
                "preferred_hours: {h} is not an hour of the day"
            )));
        }
        if self.quiet_buffer_minutes > 180 {
            return Err(CadenceError::Validation(format!(
                "quiet_buffer_minutes too large: {}",
                self.quiet_buffer_minutes
            )));
        }
        if let Some(period) = &self.holy_period {
            if period.start > period.end {
                return Err(CadenceError::Validation(format!(
                    "holy_period `{}` ends before it starts",
                    period.name
                )));
            }
            if let Some(window) = period.working_hours {
                window.validate("holy_period.working_hours")?;
            }
            if let Some(h) = period.preferred_hours.iter().find(|h| **h >= 24) {
                return Err(CadenceError::Validation(format!(
                    "holy_period.preferred_hours: {h} is not an hour of the day"
                )));
            }
        }
        Ok(())
    }
}
