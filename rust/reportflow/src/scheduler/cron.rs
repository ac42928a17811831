//! Cron expression parsing and evaluation.
//!
//! Standard five-field format: `minute hour day month weekday`. Each field
//! accepts `*`, single values, ranges (`1-5`), steps (`*/15`, `10-40/10`,
//! `5/20`) and comma lists of those. Weekday 0 and 7 are both Sunday. When
//! both day-of-month and weekday are restricted, a time matches if either
//! does.

use std::fmt::Debug;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Computes cron run times.
pub trait CronEvaluator: Send + Sync + Debug {
    /// Reject expressions this evaluator cannot handle.
    fn validate(&self, expression: &str) -> Result<()>;

    /// First run strictly after `from`, evaluated in `timezone`. `None` when
    /// nothing matches within a year.
    fn next_run(&self, expression: &str, timezone: Tz, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>>;
}

/// Evaluator backed by [`CronParser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCronEvaluator;

impl CronEvaluator for DefaultCronEvaluator {
    fn validate(&self, expression: &str) -> Result<()> {
        CronParser::parse(expression).map(|_| ())
    }

    fn next_run(&self, expression: &str, timezone: Tz, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        Ok(CronParser::parse(expression)?.next_after(&from, timezone))
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

/// Allowed values of one field as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    bits: u64,
    /// Written as `*` (or `*/1`).
    any: bool,
}

impl CronField {
    fn matches(self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }
}

/// Cron expression parser.
#[derive(Debug)]
pub struct CronParser;

impl CronParser {
    /// Parse a cron expression string.
    ///
    /// - `0 0 * * *` daily at midnight
    /// - `*/5 * * * *` every 5 minutes
    /// - `0 9-17 * * 1-5` hourly 9:00 to 17:00, Monday to Friday
    pub fn parse(expr: &str) -> Result<CronExpression> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            anyhow::bail!("Cron expression must have 5 fields: {expr}");
        }

        let mut weekday = Self::parse_field(parts[4], 0, 7).context("Invalid weekday field")?;
        if weekday.matches(7) {
            weekday.bits = (weekday.bits | 1) & !(1 << 7);
        }

        Ok(CronExpression {
            minute: Self::parse_field(parts[0], 0, 59).context("Invalid minute field")?,
            hour: Self::parse_field(parts[1], 0, 23).context("Invalid hour field")?,
            day: Self::parse_field(parts[2], 1, 31).context("Invalid day field")?,
            month: Self::parse_field(parts[3], 1, 12).context("Invalid month field")?,
            weekday,
        })
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<CronField> {
        let mut bits = 0u64;
        let mut any = false;

        for item in field.split(',') {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().context("Invalid step value")?;
                    if step == 0 || step > max {
                        anyhow::bail!("Step value must be 1-{max}");
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                any |= step == 1;
                (min, max)
            } else if let Some((start, end)) = range.split_once('-') {
                let start: u32 = start.parse().context("Invalid range start")?;
                let end: u32 = end.parse().context("Invalid range end")?;
                if start < min || end > max || start > end {
                    anyhow::bail!("Range values must be {min}-{max} with start <= end");
                }
                (start, end)
            } else {
                let value: u32 = range.parse().context("Invalid numeric value")?;
                if value < min || value > max {
                    anyhow::bail!("Value must be {min}-{max}");
                }
                // `5/20` runs from 5 to the end of the field.
                if step > 1 {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            for value in (start..=end).step_by(step as usize) {
                bits |= 1 << value;
            }
        }

        Ok(CronField { bits, any })
    }
}

impl CronExpression {
    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day.matches(date.day());
        let dow = self.weekday.matches(date.weekday().num_days_from_sunday());
        match (self.day.any, self.weekday.any) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// Check if the expression matches a local wall-clock time.
    pub fn matches_local(&self, time: &NaiveDateTime) -> bool {
        self.day_matches(time.date())
            && self.hour.matches(time.hour())
            && self.minute.matches(time.minute())
    }

    /// Check if the expression matches the given UTC time.
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.matches_local(&time.naive_utc())
    }

    /// Next matching minute strictly after `after`, evaluated in `timezone`.
    ///
    /// Scans at most a year ahead, skipping whole days and hours that cannot
    /// match. Local times that do not exist (DST gaps) are skipped.
    pub fn next_after(&self, after: &DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&timezone).naive_local();
        let mut current = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = local + Duration::days(366);

        while current <= limit {
            if !self.day_matches(current.date()) {
                current = current.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.matches(current.hour()) {
                current = current.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if self.minute.matches(current.minute()) {
                if let Some(resolved) = timezone.from_local_datetime(&current).earliest() {
                    let utc = resolved.with_timezone(&Utc);
                    if utc > *after {
                        return Some(utc);
                    }
                }
            }
            current += Duration::minutes(1);
        }
        None
    }
}
