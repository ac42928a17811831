//! Report definitions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{compare_values, Parameters, Row};
use crate::error::{CoreResult, ReportError};

/// Declarative report: datasets, parameters, filters, sorts and
/// visualizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    /// Report id. Empty until registration assigns one.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub datasets: Vec<DatasetSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    /// Filters applied to every dataset after loading.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub sorts: Vec<SortSpec>,
    #[serde(default)]
    pub visualizations: Vec<VisualizationSpec>,
    #[serde(default)]
    pub triggers: ReportTriggers,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ReportDefinition {
    /// Start a definition with no datasets.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: None,
            datasets: Vec::new(),
            parameters: Vec::new(),
            filters: Vec::new(),
            sorts: Vec::new(),
            visualizations: Vec::new(),
            triggers: ReportTriggers::default(),
            version: default_version(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_dataset(mut self, dataset: DatasetSpec) -> Self {
        self.datasets.push(dataset);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterDecl) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sorts.push(sort);
        self
    }

    #[must_use]
    pub fn with_visualization(mut self, visualization: VisualizationSpec) -> Self {
        self.visualizations.push(visualization);
        self
    }

    /// Check structural requirements: a name, at least one dataset, and every
    /// dataset naming a table and at least one column.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(ReportError::validation("report name is required"));
        }
        if self.datasets.is_empty() {
            return Err(ReportError::validation(format!(
                "report '{}' must define at least one dataset",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for (index, dataset) in self.datasets.iter().enumerate() {
            if dataset.name.trim().is_empty() {
                return Err(ReportError::validation(format!(
                    "dataset #{index} is missing a name"
                )));
            }
            if dataset.table.trim().is_empty() {
                return Err(ReportError::validation(format!(
                    "dataset '{}' is missing a table",
                    dataset.name
                )));
            }
            if dataset.columns.is_empty() {
                return Err(ReportError::validation(format!(
                    "dataset '{}' must select at least one column",
                    dataset.name
                )));
            }
            if !names.insert(dataset.name.as_str()) {
                return Err(ReportError::validation(format!(
                    "dataset name '{}' is used more than once",
                    dataset.name
                )));
            }
            if let Some(aggregation) = &dataset.aggregation {
                if aggregation.fields.is_empty() {
                    return Err(ReportError::validation(format!(
                        "aggregation on dataset '{}' has no fields",
                        dataset.name
                    )));
                }
            }
        }

        let mut parameter_names = HashSet::new();
        for parameter in &self.parameters {
            if parameter.name.trim().is_empty() {
                return Err(ReportError::validation("parameter name is required"));
            }
            if !parameter_names.insert(parameter.name.as_str()) {
                return Err(ReportError::validation(format!(
                    "parameter '{}' is declared more than once",
                    parameter.name
                )));
            }
        }

        for visualization in &self.visualizations {
            if !names.contains(visualization.dataset.as_str()) {
                return Err(ReportError::validation(format!(
                    "visualization '{}' references unknown dataset '{}'",
                    visualization.id, visualization.dataset
                )));
            }
        }

        Ok(())
    }

    /// Look up a dataset by name.
    #[must_use]
    pub fn dataset(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

/// One dataset of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    /// Load-time conditions. String values of the form `"$name"` are bound to
    /// the parameter `name`.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSpec>,
}

impl DatasetSpec {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
            limit: None,
            aggregation: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_aggregation(mut self, aggregation: AggregationSpec) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Whether `*` selects every column.
    #[must_use]
    pub fn selects_all(&self) -> bool {
        self.columns.iter().any(|c| c == "*")
    }
}

/// Parameter value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    /// ISO-8601 date or date-time string.
    Date,
    List,
}

/// Declared report parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDecl {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
    NotIn,
    /// `value` is a two-element array, bounds inclusive.
    Between,
    IsNull,
    NotNull,
}

/// Row predicate on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterSpec {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Substitute `"$name"` placeholders (top level or inside arrays) with
    /// bound parameter values. Unknown placeholders bind to `null`.
    #[must_use]
    pub fn bind(&self, parameters: &Parameters) -> Self {
        Self {
            field: self.field.clone(),
            operator: self.operator,
            value: bind_value(&self.value, parameters),
        }
    }

    /// Evaluate the predicate against a row. A missing field reads as `null`.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);
        let expected = &self.value;

        match self.operator {
            FilterOperator::Eq => values_equal(actual, expected),
            FilterOperator::Ne => !values_equal(actual, expected),
            FilterOperator::Gt => compare_values(actual, expected).is_some_and(|o| o.is_gt()),
            FilterOperator::Gte => compare_values(actual, expected).is_some_and(|o| o.is_ge()),
            FilterOperator::Lt => compare_values(actual, expected).is_some_and(|o| o.is_lt()),
            FilterOperator::Lte => compare_values(actual, expected).is_some_and(|o| o.is_le()),
            FilterOperator::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
                (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
                _ => false,
            },
            FilterOperator::In => expected
                .as_array()
                .is_some_and(|items| items.iter().any(|i| values_equal(actual, i))),
            FilterOperator::NotIn => expected
                .as_array()
                .is_none_or(|items| !items.iter().any(|i| values_equal(actual, i))),
            FilterOperator::Between => match expected.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    compare_values(actual, low).is_some_and(|o| o.is_ge())
                        && compare_values(actual, high).is_some_and(|o| o.is_le())
                }
                _ => false,
            },
            FilterOperator::IsNull => actual.is_null(),
            FilterOperator::NotNull => !actual.is_null(),
        }
    }
}

fn bind_value(value: &Value, parameters: &Parameters) -> Value {
    match value {
        Value::String(s) => match s.strip_prefix('$') {
            Some(name) if !name.is_empty() => {
                parameters.get(name).cloned().unwrap_or(Value::Null)
            }
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| bind_value(v, parameters)).collect()),
        _ => value.clone(),
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(a, b).is_some_and(std::cmp::Ordering::is_eq)
        }
        _ => a == b,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key. Applies to every dataset containing the field unless `dataset`
/// names one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            dataset: None,
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            dataset: None,
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    #[must_use]
    pub fn on_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Whether this key applies to `dataset`.
    #[must_use]
    pub fn applies_to(&self, dataset: &str) -> bool {
        self.dataset.as_deref().is_none_or(|d| d == dataset)
    }
}

/// The five scalar reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        };
        f.write_str(name)
    }
}

/// One aggregated output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateField {
    pub field: String,
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateField {
    pub fn new(field: impl Into<String>, function: AggregateFunction) -> Self {
        Self {
            field: field.into(),
            function,
            alias: None,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output column name: the alias, or `<function>_<field>`.
    #[must_use]
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.function, self.field))
    }
}

/// Per-dataset aggregation. With `group_by` the dataset's rows are replaced
/// by one row per group; without it the rows are kept and the scalars are
/// attached to the dataset result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    pub fields: Vec<AggregateField>,
}

/// Visualization kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    Table,
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
    Metric,
}

/// Chart built from one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSpec {
    pub id: String,
    pub kind: VisualizationKind,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,
    #[serde(default)]
    pub value_fields: Vec<String>,
}

/// Named hooks run around a generation. Hook names resolve against the
/// hooks registered on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportTriggers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_generate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_generate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_requires_dataset() {
        let err = ReportDefinition::new("Empty").validate().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_requires_columns_and_table() {
        let def = ReportDefinition::new("Sales")
            .with_dataset(DatasetSpec::new("sales", "sales", Vec::<String>::new()));
        assert!(def.validate().unwrap_err().to_string().contains("column"));

        let def = ReportDefinition::new("Sales").with_dataset(DatasetSpec::new("sales", "", ["id"]));
        assert!(def.validate().unwrap_err().to_string().contains("table"));
    }

    #[test]
    fn test_validate_rejects_duplicate_dataset_names() {
        let def = ReportDefinition::new("Dup")
            .with_dataset(DatasetSpec::new("a", "t1", ["id"]))
            .with_dataset(DatasetSpec::new("a", "t2", ["id"]));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_filter_operators() {
        let r = row(json!({"region": "North", "amount": 120, "tags": ["vip"]}));

        assert!(FilterSpec::eq("region", json!("North")).matches(&r));
        assert!(FilterSpec::new("amount", FilterOperator::Gte, json!(120.0)).matches(&r));
        assert!(!FilterSpec::new("amount", FilterOperator::Lt, json!(100)).matches(&r));
        assert!(FilterSpec::new("amount", FilterOperator::Between, json!([100, 150])).matches(&r));
        assert!(FilterSpec::new("region", FilterOperator::Contains, json!("nor")).matches(&r));
        assert!(FilterSpec::new("tags", FilterOperator::Contains, json!("vip")).matches(&r));
        assert!(FilterSpec::new("region", FilterOperator::In, json!(["South", "North"])).matches(&r));
        assert!(FilterSpec::new("region", FilterOperator::NotIn, json!(["South"])).matches(&r));
        assert!(FilterSpec::new("missing", FilterOperator::IsNull, Value::Null).matches(&r));
        assert!(!FilterSpec::new("missing", FilterOperator::NotNull, Value::Null).matches(&r));
    }

    #[test]
    fn test_filter_binds_parameters() {
        let mut params = Parameters::new();
        params.insert("region".to_string(), json!("West"));

        let bound = FilterSpec::eq("region", json!("$region")).bind(&params);
        assert_eq!(bound.value, json!("West"));

        let bound = FilterSpec::new("region", FilterOperator::In, json!(["$region", "East"]))
            .bind(&params);
        assert_eq!(bound.value, json!(["West", "East"]));

        let bound = FilterSpec::eq("region", json!("$unknown")).bind(&params);
        assert_eq!(bound.value, Value::Null);
    }

    #[test]
    fn test_aggregate_output_name() {
        assert_eq!(
            AggregateField::new("amount", AggregateFunction::Sum).output_name(),
            "sum_amount"
        );
        assert_eq!(
            AggregateField::new("amount", AggregateFunction::Avg)
                .alias("average")
                .output_name(),
            "average"
        );
    }

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let def: ReportDefinition = serde_json::from_value(json!({
            "name": "Sales",
            "datasets": [{"name": "sales", "table": "sales", "columns": ["*"]}]
        }))
        .unwrap();
        assert_eq!(def.version, 1);
        assert!(def.id.is_empty());
        assert!(def.datasets[0].selects_all());
        assert!(def.validate().is_ok());
    }
}
