//! Schedule definitions, scheduled jobs and their run logs.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExportFormat, Parameters};
use crate::error::{CoreResult, ReportError};

/// Recurrence kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Once,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl Frequency {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Cron => "cron",
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// When a job or subscription should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub frequency: Frequency,
    /// Hours between hourly runs. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    /// 0 = Sunday through 6 = Saturday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// 1 to 31, clamped to the month's length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    /// Local time of day, "HH:MM". Defaults to 00:00.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl ScheduleDefinition {
    fn with_frequency(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: None,
            day_of_week: None,
            day_of_month: None,
            time: None,
            cron: None,
            start_date: None,
            end_date: None,
            timezone: default_timezone(),
        }
    }

    /// Run once at `at`.
    #[must_use]
    pub fn once(at: DateTime<Utc>) -> Self {
        let mut def = Self::with_frequency(Frequency::Once);
        def.start_date = Some(at);
        def
    }

    #[must_use]
    pub fn hourly(interval: u32) -> Self {
        let mut def = Self::with_frequency(Frequency::Hourly);
        def.interval = Some(interval);
        def
    }

    #[must_use]
    pub fn daily(time: impl Into<String>) -> Self {
        let mut def = Self::with_frequency(Frequency::Daily);
        def.time = Some(time.into());
        def
    }

    #[must_use]
    pub fn weekly(day_of_week: u8, time: impl Into<String>) -> Self {
        let mut def = Self::with_frequency(Frequency::Weekly);
        def.day_of_week = Some(day_of_week);
        def.time = Some(time.into());
        def
    }

    #[must_use]
    pub fn monthly(day_of_month: u8, time: impl Into<String>) -> Self {
        let mut def = Self::with_frequency(Frequency::Monthly);
        def.day_of_month = Some(day_of_month);
        def.time = Some(time.into());
        def
    }

    #[must_use]
    pub fn cron(expression: impl Into<String>) -> Self {
        let mut def = Self::with_frequency(Frequency::Cron);
        def.cron = Some(expression.into());
        def
    }

    #[must_use]
    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    #[must_use]
    pub fn starting(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    #[must_use]
    pub fn ending(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Parsed time of day, midnight when unset.
    pub fn time_of_day(&self) -> CoreResult<NaiveTime> {
        match self.time.as_deref() {
            None => Ok(NaiveTime::MIN),
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| {
                ReportError::validation(format!("time '{raw}' must be formatted as HH:MM: {e}"))
            }),
        }
    }
}

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

/// Summary of the most recent run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunResult {
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A report bound to a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub report_id: String,
    pub schedule: ScheduleDefinition,
    #[serde(default)]
    pub parameters: Parameters,
    /// Email recipients. No dispatch happens when empty.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<JobRunResult>,
    pub enabled: bool,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Whether the job is armed and due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| next <= now)
    }

    /// Disable and clear `next_run`.
    pub fn disable(&mut self, now: DateTime<Utc>) {
        self.enabled = false;
        self.next_run = None;
        self.updated_at = now;
    }
}

/// Append-only record of one triggered run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub schedule_id: String,
    pub report_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: LogStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub row_count: usize,
    #[serde(default)]
    pub artifact_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLog {
    pub fn new(
        schedule_id: impl Into<String>,
        report_id: impl Into<String>,
        status: LogStatus,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.into(),
            report_id: report_id.into(),
            execution_id: None,
            status,
            started_at,
            completed_at,
            duration_ms: u64::try_from((completed_at - started_at).num_milliseconds())
                .unwrap_or(0),
            row_count: 0,
            artifact_size: 0,
            artifact_location: None,
            error: None,
        }
    }
}
