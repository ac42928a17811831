//! Execution records and generated results.
//!
//! An [`Execution`] follows a small state machine:
//!
//! ```text
//! running ──complete──▶ completed
//!    │ ├────fail──────▶ failed
//!    │ └────cancel────▶ cancelled
//! ```
//!
//! Once it leaves `running` it is terminal and further transitions are no-ops.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Parameters, Row, VisualizationKind};

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub report_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub parameters: Parameters,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// 0 to 100, never decreases within a run.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReportResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// New running execution at progress 0.
    pub fn new(report_id: impl Into<String>, parameters: Parameters, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            report_id: report_id.into(),
            status: ExecutionStatus::Running,
            parameters,
            started_at: now,
            completed_at: None,
            progress: 0,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise progress to `progress` (capped at 100). Lower values and
    /// terminal executions are ignored.
    pub fn advance(&mut self, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    /// Mark completed with the result.
    pub fn complete(&mut self, result: ReportResult, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
        self.result = Some(result);
        true
    }

    /// Mark failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(error.into());
        true
    }

    /// Flip `running → cancelled`. Returns whether the status changed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(now);
        true
    }

    /// Wall time of a finished execution.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        let completed = self.completed_at?;
        u64::try_from((completed - self.started_at).num_milliseconds()).ok()
    }
}

/// Outcome classification of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Failed,
}

/// Rows and scalar aggregates of one dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub aggregates: Map<String, Value>,
}

impl DatasetResult {
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            aggregates: Map::new(),
        }
    }

    /// Replace the rows, keeping `row_count` in step.
    pub fn set_rows(&mut self, rows: Vec<Row>) {
        self.row_count = rows.len();
        self.rows = rows;
    }
}

/// One named series of a visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Value>,
}

/// Chart data built from a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub id: String,
    pub kind: VisualizationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub dataset: String,
    #[serde(default)]
    pub labels: Vec<Value>,
    #[serde(default)]
    pub series: Vec<Series>,
}

/// Output of a successful generation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub id: String,
    pub report_id: String,
    pub report_name: String,
    /// Execution that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub parameters: Parameters,
    pub datasets: BTreeMap<String, DatasetResult>,
    #[serde(default)]
    pub visualizations: Vec<Visualization>,
    /// Sum of per-dataset row counts.
    pub row_count: usize,
    pub status: ResultStatus,
}

impl ReportResult {
    /// Recompute `row_count` from the datasets.
    pub fn recount(&mut self) {
        self.row_count = self.datasets.values().map(|d| d.row_count).sum();
    }
}

/// Query over retained executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub report_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    #[must_use]
    pub fn for_report(report_id: impl Into<String>) -> Self {
        Self {
            report_id: Some(report_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, execution: &Execution) -> bool {
        self.report_id
            .as_deref()
            .is_none_or(|id| execution.report_id == id)
            && self.status.is_none_or(|s| execution.status == s)
    }
}
