//! Next-run computation for schedule definitions.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::cron::CronEvaluator;
use crate::domain::{Frequency, ScheduleDefinition};
use crate::error::{CoreResult, ReportError};

/// Longest accepted hourly interval: one leap year.
pub const MAX_HOURLY_INTERVAL: u32 = 366 * 24;

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> CoreResult<Tz> {
    name.parse::<Tz>()
        .map_err(|e| ReportError::validation(format!("unknown timezone '{name}': {e}")))
}

/// Check a definition before it is armed.
pub fn validate_schedule(def: &ScheduleDefinition, cron: &dyn CronEvaluator) -> CoreResult<()> {
    parse_timezone(&def.timezone)?;
    def.time_of_day()?;

    match def.interval {
        Some(0) => return Err(ReportError::validation("interval must be at least 1")),
        Some(hours) if hours > MAX_HOURLY_INTERVAL => {
            return Err(ReportError::validation(format!(
                "interval must be at most {MAX_HOURLY_INTERVAL} hours, got {hours}"
            )));
        }
        _ => {}
    }
    if let (Some(start), Some(end)) = (def.start_date, def.end_date) {
        if end < start {
            return Err(ReportError::validation("end_date must not precede start_date"));
        }
    }

    match def.frequency {
        Frequency::Once if def.start_date.is_none() => {
            Err(ReportError::validation("a one-time schedule requires start_date"))
        }
        Frequency::Weekly => match def.day_of_week {
            Some(day) if day <= 6 => Ok(()),
            Some(day) => Err(ReportError::validation(format!(
                "day_of_week must be 0 (Sunday) to 6 (Saturday), got {day}"
            ))),
            None => Err(ReportError::validation("a weekly schedule requires day_of_week")),
        },
        Frequency::Monthly => match def.day_of_month {
            None => Ok(()),
            Some(day) if (1..=31).contains(&day) => Ok(()),
            Some(day) => Err(ReportError::validation(format!(
                "day_of_month must be 1 to 31, got {day}"
            ))),
        },
        Frequency::Cron => {
            let expression = def
                .cron
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| ReportError::validation("a cron schedule requires an expression"))?;
            cron.validate(expression)
                .map_err(|e| ReportError::validation(format!("invalid cron expression '{expression}': {e:#}")))
        }
        _ => Ok(()),
    }
}

/// Compute the next run after `now`.
///
/// - `once`: `start_date` until it has fired, then `None`.
/// - `hourly`: `interval` hours (default 1) after the base.
/// - `daily`: the next calendar day at `time`.
/// - `weekly`: the next `day_of_week` strictly after today, at `time`.
/// - `monthly`: next month on `day_of_month` (default 1, clamped), at `time`.
/// - `cron`: the evaluator's next match after the base.
///
/// Recurring schedules use `start_date` as the base while it lies in the
/// future. Any result past `end_date` is `None`.
pub fn calculate_next_run(
    def: &ScheduleDefinition,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    cron: &dyn CronEvaluator,
) -> CoreResult<Option<DateTime<Utc>>> {
    let tz = parse_timezone(&def.timezone)?;
    let time = def.time_of_day()?;

    let next = match def.frequency {
        Frequency::Once => {
            if last_run.is_some() {
                return Ok(None);
            }
            Some(
                def.start_date
                    .ok_or_else(|| ReportError::validation("a one-time schedule requires start_date"))?,
            )
        }
        recurring => {
            let base = def.start_date.map_or(now, |start| start.max(now));
            let local_date = base.with_timezone(&tz).date_naive();

            match recurring {
                Frequency::Hourly => {
                    let hours = i64::from(def.interval.unwrap_or(1).max(1));
                    let next = Duration::try_hours(hours)
                        .and_then(|step| base.checked_add_signed(step))
                        .ok_or_else(|| {
                            ReportError::validation(format!("an interval of {hours} hours is out of range"))
                        })?;
                    Some(next)
                }
                Frequency::Daily => local_date
                    .succ_opt()
                    .and_then(|date| resolve_local(tz, date, time)),
                Frequency::Weekly => {
                    let target = i64::from(def.day_of_week.unwrap_or(0));
                    let today = i64::from(local_date.weekday().num_days_from_sunday());
                    let mut delta = target - today;
                    if delta <= 0 {
                        delta += 7;
                    }
                    resolve_local(tz, local_date + Duration::days(delta), time)
                }
                Frequency::Monthly => {
                    let first_of_next = local_date
                        .with_day(1)
                        .and_then(|d| d.checked_add_months(Months::new(1)));
                    first_of_next.and_then(|first| {
                        let day = u32::from(def.day_of_month.unwrap_or(1).max(1)).min(days_in_month(first));
                        first.with_day(day).and_then(|date| resolve_local(tz, date, time))
                    })
                }
                Frequency::Cron => {
                    let expression = def
                        .cron
                        .as_deref()
                        .ok_or_else(|| ReportError::validation("a cron schedule requires an expression"))?;
                    cron.next_run(expression, tz, base)
                        .map_err(|e| ReportError::validation(format!("invalid cron expression '{expression}': {e:#}")))?
                }
                Frequency::Once => None,
            }
        }
    };

    Ok(next.filter(|at| def.end_date.is_none_or(|end| *at <= end)))
}

fn days_in_month(first: NaiveDate) -> u32 {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map_or(28, |last| last.day())
}

/// Local wall-clock time to UTC. Times inside a DST gap move forward an hour.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::new(date, time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
}
