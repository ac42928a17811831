//! Pure pipeline stages applied after loading.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::collaborators::Aggregator;
use crate::domain::{
    total_order, AggregationSpec, DatasetResult, FilterSpec, Row, Series, SortDirection, SortSpec,
    Visualization, VisualizationKind, VisualizationSpec,
};

/// Apply global filters. A filter only constrains datasets whose rows carry
/// its field.
pub fn apply_filters(datasets: &mut BTreeMap<String, DatasetResult>, filters: &[FilterSpec]) {
    if filters.is_empty() {
        return;
    }

    for dataset in datasets.values_mut() {
        let applicable: Vec<&FilterSpec> = filters
            .iter()
            .filter(|f| dataset.rows.iter().any(|row| row.contains_key(&f.field)))
            .collect();
        if applicable.is_empty() {
            continue;
        }

        let rows = std::mem::take(&mut dataset.rows);
        dataset.set_rows(
            rows.into_iter()
                .filter(|row| applicable.iter().all(|f| f.matches(row)))
                .collect(),
        );
    }
}

/// Run one dataset's aggregation.
///
/// With `group_by` the rows become one row per group, in first-appearance
/// order, holding the group fields and the aggregated columns. Without it the
/// rows stay and the scalars land in `aggregates`.
pub fn aggregate(
    dataset: &mut DatasetResult,
    spec: &AggregationSpec,
    aggregator: &dyn Aggregator,
) -> anyhow::Result<()> {
    if spec.group_by.is_empty() {
        dataset.aggregates = aggregator.aggregate(&dataset.rows, &spec.fields)?;
        return Ok(());
    }

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: Vec<Vec<Row>> = Vec::new();
    for row in std::mem::take(&mut dataset.rows) {
        let key: Vec<Value> = spec
            .group_by
            .iter()
            .map(|field| row.get(field).cloned().unwrap_or(Value::Null))
            .collect();
        match order.iter().position(|k| *k == key) {
            Some(index) => groups[index].push(row),
            None => {
                order.push(key);
                groups.push(vec![row]);
            }
        }
    }

    let mut grouped = Vec::with_capacity(groups.len());
    for (key, rows) in order.into_iter().zip(groups) {
        let mut out = Row::new();
        for (field, value) in spec.group_by.iter().zip(key) {
            out.insert(field.clone(), value);
        }
        out.extend(aggregator.aggregate(&rows, &spec.fields)?);
        grouped.push(out);
    }

    dataset.set_rows(grouped);
    Ok(())
}

/// Stable multi-key sort of every dataset the keys apply to.
pub fn apply_sorts(datasets: &mut BTreeMap<String, DatasetResult>, sorts: &[SortSpec]) {
    if sorts.is_empty() {
        return;
    }

    for (name, dataset) in datasets.iter_mut() {
        let keys: Vec<&SortSpec> = sorts.iter().filter(|s| s.applies_to(name)).collect();
        if keys.is_empty() {
            continue;
        }

        dataset.rows.sort_by(|a, b| {
            for key in &keys {
                let left = a.get(&key.field).unwrap_or(&Value::Null);
                let right = b.get(&key.field).unwrap_or(&Value::Null);
                let ordering = match key.direction {
                    SortDirection::Asc => total_order(left, right),
                    SortDirection::Desc => total_order(right, left),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
}

/// Build chart data for each visualization spec.
///
/// Labels come from `label_field` (row index when absent). A `metric` over a
/// dataset with scalar aggregates reads its values from them.
pub fn build_visualizations(
    specs: &[VisualizationSpec],
    datasets: &BTreeMap<String, DatasetResult>,
) -> Vec<Visualization> {
    specs
        .iter()
        .filter_map(|spec| {
            let dataset = datasets.get(&spec.dataset)?;

            if spec.kind == VisualizationKind::Metric && !dataset.aggregates.is_empty() {
                let series = spec
                    .value_fields
                    .iter()
                    .map(|field| Series {
                        name: field.clone(),
                        values: vec![dataset.aggregates.get(field).cloned().unwrap_or(Value::Null)],
                    })
                    .collect();
                return Some(Visualization {
                    id: spec.id.clone(),
                    kind: spec.kind,
                    title: spec.title.clone(),
                    dataset: spec.dataset.clone(),
                    labels: Vec::new(),
                    series,
                });
            }

            let labels = dataset
                .rows
                .iter()
                .enumerate()
                .map(|(index, row)| match &spec.label_field {
                    Some(field) => row.get(field).cloned().unwrap_or(Value::Null),
                    None => Value::from(index),
                })
                .collect();

            let series = spec
                .value_fields
                .iter()
                .map(|field| Series {
                    name: field.clone(),
                    values: dataset
                        .rows
                        .iter()
                        .map(|row| row.get(field).cloned().unwrap_or(Value::Null))
                        .collect(),
                })
                .collect();

            Some(Visualization {
                id: spec.id.clone(),
                kind: spec.kind,
                title: spec.title.clone(),
                dataset: spec.dataset.clone(),
                labels,
                series,
            })
        })
        .collect()
}
