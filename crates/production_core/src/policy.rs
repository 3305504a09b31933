//! crates/production_core/src/policy.rs
//!
//! Pure quota and time-window rules deciding whether a new generation may
//! start.
//!
//! Both the calendar-day boundary of the usage counter and the allowed hour
//! window are evaluated in the same named timezone.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// Per-user usage counters as stored on the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaState {
    pub daily_count: u32,
    pub last_count_date: Option<NaiveDate>,
    /// Day on which the invite bonus was last granted.
    pub last_bonus_date: Option<NaiveDate>,
}

impl QuotaState {
    /// The stored count when it belongs to `today`, otherwise 0.
    pub fn effective_count(&self, today: NaiveDate) -> u32 {
        if self.last_count_date == Some(today) {
            self.daily_count
        } else {
            0
        }
    }

    /// State after one more successful submission on `today`.
    pub fn next_usage(&self, today: NaiveDate) -> QuotaState {
        QuotaState {
            daily_count: self.effective_count(today) + 1,
            last_count_date: Some(today),
            last_bonus_date: self.last_bonus_date,
        }
    }

    /// Gives back one attempt, at most once per calendar day.
    ///
    /// Returns `None` when the bonus was already granted today or when there
    /// is no usage to give back.
    pub fn grant_invite_bonus(&self, today: NaiveDate) -> Option<QuotaState> {
        if self.last_bonus_date == Some(today) {
            return None;
        }
        let effective = self.effective_count(today);
        if effective == 0 {
            return None;
        }
        Some(QuotaState {
            daily_count: effective - 1,
            last_count_date: Some(today),
            last_bonus_date: Some(today),
        })
    }
}

/// Allowed hours of the day, `[start_hour, end_hour)` in local time.
/// A window with `start_hour > end_hour` spans midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Maintenance,
    OutOfWindow,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub effective_count: u32,
    pub daily_limit: u32,
    pub verdict: Verdict,
}

impl QuotaDecision {
    pub fn allowed(&self) -> bool {
        self.verdict == Verdict::Allowed
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.effective_count)
    }
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub daily_limit: u32,
    pub window: Option<HourWindow>,
    pub timezone: Tz,
}

impl QuotaPolicy {
    pub fn new(daily_limit: u32, window: Option<HourWindow>, timezone: Tz) -> Self {
        Self {
            daily_limit,
            window,
            timezone,
        }
    }

    /// Calendar day of `now` in the policy timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.timezone).hour()
    }

    /// Checks maintenance, then the hour window, then the daily counter.
    pub fn evaluate(
        &self,
        quota: &QuotaState,
        now: DateTime<Utc>,
        maintenance: bool,
    ) -> QuotaDecision {
        let effective_count = quota.effective_count(self.today(now));
        let verdict = if maintenance {
            Verdict::Maintenance
        } else if self
            .window
            .is_some_and(|w| !w.contains(self.local_hour(now)))
        {
            Verdict::OutOfWindow
        } else if effective_count >= self.daily_limit {
            Verdict::Exhausted
        } else {
            Verdict::Allowed
        };

        QuotaDecision {
            effective_count,
            daily_limit: self.daily_limit,
            verdict,
        }
    }
}
