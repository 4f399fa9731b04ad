//! Cron schedule evaluation.
//!
//! User-supplied expressions use the familiar 5-field form; the `cron`
//! crate wants a seconds column, so a `0` is prepended before parsing.
//! All evaluation is in UTC and quantized to minute periods: a schedule
//! is "due" when its next fire time falls inside the current minute.

use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A parsed, evaluatable cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses a 5-field (minute-resolution) or 6-field (with seconds)
    /// cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidCronExpression`].
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields = expression.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        let schedule =
            Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Returns the expression as the user wrote it.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns true when the schedule fires within `now`'s minute.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let period_start = minute_start(now);
        let period_end = period_start + Duration::minutes(1);
        self.schedule
            .after(&(period_start - Duration::seconds(1)))
            .next()
            .is_some_and(|next| next >= period_start && next < period_end)
    }

    /// Returns the next `n` fire times after `after`, for the editor's
    /// schedule preview.
    #[must_use]
    pub fn upcoming(&self, n: usize, after: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(n).collect()
    }
}

/// Truncates a timestamp to the start of its minute.
#[must_use]
pub fn minute_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()))
}

/// Returns true when a workflow already ran within `now`'s minute
/// period. This is the duplicate-run suppression predicate: comparing
/// against the period start keeps it monotonic even when a sweep runs
/// early or late inside the minute.
#[must_use]
pub fn fired_in_current_period(last_executed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_executed_at.is_some_and(|last| last >= minute_start(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, s).single().expect("valid time")
    }

    #[test]
    fn five_field_expressions_parse() {
        assert!(CronSchedule::parse("0 9 * * *").is_ok());
        assert!(CronSchedule::parse("*/5 * * * *").is_ok());
    }

    #[test]
    fn six_field_expressions_parse() {
        assert!(CronSchedule::parse("0 0 9 * * *").is_ok());
    }

    #[test]
    fn garbage_is_rejected_with_the_expression_named() {
        let err = CronSchedule::parse("whenever it suits").unwrap_err();
        match err {
            ScheduleError::InvalidCronExpression { expression, .. } => {
                assert_eq!(expression, "whenever it suits");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_minute_is_always_due() {
        let schedule = CronSchedule::parse("* * * * *").expect("parse");
        assert!(schedule.is_due(at(14, 37, 12)));
        assert!(schedule.is_due(at(0, 0, 0)));
    }

    #[test]
    fn daily_at_nine_is_due_only_that_minute() {
        let schedule = CronSchedule::parse("0 9 * * *").expect("parse");
        assert!(schedule.is_due(at(9, 0, 0)));
        assert!(schedule.is_due(at(9, 0, 45)));
        assert!(!schedule.is_due(at(9, 1, 0)));
        assert!(!schedule.is_due(at(8, 59, 59)));
    }

    #[test]
    fn upcoming_previews_fire_times() {
        let schedule = CronSchedule::parse("0 9 * * *").expect("parse");
        let times = schedule.upcoming(3, at(10, 0, 0));
        assert_eq!(times.len(), 3);
        assert!(times.iter().all(|t| t.hour() == 9 && t.minute() == 0));
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn minute_start_truncates() {
        assert_eq!(minute_start(at(14, 37, 42)), at(14, 37, 0));
        assert_eq!(minute_start(at(14, 37, 0)), at(14, 37, 0));
    }

    #[test]
    fn suppression_within_the_same_minute() {
        let now = at(9, 0, 30);
        assert!(fired_in_current_period(Some(at(9, 0, 5)), now));
        assert!(!fired_in_current_period(Some(at(8, 59, 59)), now));
        assert!(!fired_in_current_period(None, now));
    }
}
