//! Core domain models: report definitions, executions, schedules and
//! subscriptions.

pub mod execution;
pub mod report;
pub mod schedule;
pub mod subscription;

pub use execution::{
    DatasetResult, Execution, ExecutionFilter, ExecutionStatus, ReportResult, ResultStatus,
    Series, Visualization,
};
pub use report::{
    AggregateField, AggregateFunction, AggregationSpec, DatasetSpec, FilterOperator, FilterSpec,
    ParameterDecl, ParameterType, ReportDefinition, ReportTriggers, SortDirection, SortSpec,
    VisualizationKind, VisualizationSpec,
};
pub use schedule::{
    ExecutionLog, Frequency, JobRunResult, LogStatus, ScheduleDefinition, ScheduledJob,
};
pub use subscription::{
    DeliveryConfig, DeliveryStatus, NewSubscription, Subscription, SubscriptionDelivery,
    SubscriptionPatch,
};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record of a dataset, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Bound runtime parameters. Ordered so serialisation is stable.
pub type Parameters = BTreeMap<String, Value>;

/// Output formats an exporter can be registered for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Pdf,
    Excel,
    Csv,
    #[default]
    Json,
    Xml,
    Html,
    Yaml,
    Text,
    Markdown,
}

impl ExportFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Excel => "xlsx",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Yaml => "yaml",
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Yaml => "yaml",
            Self::Text => "text",
            Self::Markdown => "markdown",
        };
        f.write_str(name)
    }
}

/// Rank used to order values of different JSON types.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two values of the same scalar kind.
///
/// Returns `None` when the values are not comparable (different types,
/// arrays, objects). ISO-8601 date strings compare correctly as strings.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order over JSON values used for sorting: nulls first, then by type,
/// then by value.
#[must_use]
pub fn total_order(a: &Value, b: &Value) -> Ordering {
    compare_values(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(
            compare_values(&json!("2024-01-02"), &json!("2024-01-01")),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_values(&json!("1"), &json!(1)), None);
    }

    #[test]
    fn test_total_order_puts_nulls_first() {
        let mut values = vec![json!(3), json!(null), json!("a"), json!(1)];
        values.sort_by(total_order);
        assert_eq!(values, vec![json!(null), json!(1), json!(3), json!("a")]);
    }

    #[test]
    fn test_export_format_names() {
        assert_eq!(ExportFormat::Excel.extension(), "xlsx");
        assert_eq!(ExportFormat::Markdown.to_string(), "markdown");
        let parsed: ExportFormat = serde_json::from_value(json!("csv")).unwrap();
        assert_eq!(parsed, ExportFormat::Csv);
    }
}
