//! Scalar aggregation.

use serde_json::{Map, Number, Value};

use crate::domain::{compare_values, AggregateField, AggregateFunction, Row};

/// Pure reduction of a row set into named scalars.
pub trait Aggregator: Send + Sync {
    /// One output value per field, keyed by [`AggregateField::output_name`].
    fn aggregate(&self, rows: &[Row], fields: &[AggregateField]) -> anyhow::Result<Map<String, Value>>;
}

/// sum, avg, count, min and max over JSON rows.
///
/// `count` counts non-null values. `sum` and `avg` ignore non-numeric values
/// and yield `null` when nothing numeric was seen. `min` and `max` compare
/// numbers, strings or booleans.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAggregator;

impl DefaultAggregator {
    fn reduce(rows: &[Row], field: &AggregateField) -> Value {
        let values = rows
            .iter()
            .filter_map(|row| row.get(&field.field))
            .filter(|v| !v.is_null());

        match field.function {
            AggregateFunction::Count => Value::from(values.count()),
            AggregateFunction::Sum | AggregateFunction::Avg => {
                let numbers: Vec<f64> = values.filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    return Value::Null;
                }
                let sum: f64 = numbers.iter().sum();
                if field.function == AggregateFunction::Sum {
                    return number(sum);
                }
                #[allow(clippy::cast_precision_loss, reason = "row counts stay far below 2^52")]
                let count = numbers.len() as f64;
                number(sum / count)
            }
            AggregateFunction::Min => values
                .min_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values
                .max_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

/// Integral results stay integers so `sum` over integer columns reads as one.
#[allow(clippy::cast_possible_truncation, reason = "guarded by fract and range checks")]
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        return Value::from(value as i64);
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

impl Aggregator for DefaultAggregator {
    fn aggregate(&self, rows: &[Row], fields: &[AggregateField]) -> anyhow::Result<Map<String, Value>> {
        Ok(fields
            .iter()
            .map(|field| (field.output_name(), Self::reduce(rows, field)))
            .collect())
    }
}
