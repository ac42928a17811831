//! Dataset loading.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{DatasetSpec, Parameters, Row};

/// Resolves a dataset spec and bound parameters to an ordered row set.
///
/// Errors are wrapped into `ReportError::Execution` by the engine.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self, spec: &DatasetSpec, parameters: &Parameters) -> anyhow::Result<Vec<Row>>;
}

/// Loader over in-memory tables.
///
/// Applies the dataset's filters (with `"$param"` bindings), projects the
/// selected columns and truncates to `limit`.
#[derive(Debug, Default)]
pub struct InMemoryDatasetLoader {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryDatasetLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table.
    pub fn insert_table(&self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.write().insert(name.into(), rows);
    }

    #[must_use]
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert_table(name, rows);
        self
    }
}

#[async_trait]
impl DatasetLoader for InMemoryDatasetLoader {
    async fn load(&self, spec: &DatasetSpec, parameters: &Parameters) -> anyhow::Result<Vec<Row>> {
        let tables = self.tables.read();
        let Some(source) = tables.get(&spec.table) else {
            anyhow::bail!("table '{}' does not exist", spec.table);
        };

        let filters: Vec<_> = spec.filters.iter().map(|f| f.bind(parameters)).collect();
        let select_all = spec.selects_all();

        let rows = source
            .iter()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .map(|row| {
                if select_all {
                    row.clone()
                } else {
                    spec.columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                        .collect()
                }
            })
            .take(spec.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(rows)
    }
}
