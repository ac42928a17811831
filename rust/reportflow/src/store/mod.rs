//! Durable storage for reports, executions, schedules and subscriptions.
//!
//! Records are stored as JSON documents keyed by `(table, id)`. Backends
//! implement [`DurableStore`]; services access them through the
//! write-through [`Repository`].

pub mod repository;
pub mod sqlite;

pub use repository::{Record, Repository};
pub use sqlite::SqliteStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// Table names.
pub mod tables {
    pub const REPORTS: &str = "reports";
    pub const EXECUTIONS: &str = "executions";
    pub const SCHEDULED_JOBS: &str = "scheduled_jobs";
    pub const EXECUTION_LOGS: &str = "execution_logs";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const SUBSCRIPTION_DELIVERIES: &str = "subscription_deliveries";
}

/// Document predicate used by [`DurableStore::query`].
pub type DocumentPredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Key/document store.
///
/// `query` returns documents in first-insertion order.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace a document.
    async fn upsert(&self, table: &str, id: &str, document: Value) -> anyhow::Result<()>;

    /// Fetch a document by id.
    async fn get(&self, table: &str, id: &str) -> anyhow::Result<Option<Value>>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, table: &str, id: &str) -> anyhow::Result<bool>;

    /// Documents of `table` matching `predicate`.
    async fn query(&self, table: &str, predicate: DocumentPredicate<'_>)
        -> anyhow::Result<Vec<Value>>;

    /// Every document of `table`.
    async fn list(&self, table: &str) -> anyhow::Result<Vec<Value>> {
        self.query(table, &|_| true).await
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// table → id → (insertion sequence, document)
    tables: RwLock<HashMap<String, HashMap<String, (u64, Value)>>>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `table`.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn upsert(&self, table: &str, id: &str, document: Value) -> anyhow::Result<()> {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();
        match rows.get_mut(id) {
            Some(entry) => entry.1 = document,
            None => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                rows.insert(id.to_string(), (seq, document));
            }
        }
        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn delete(&self, table: &str, id: &str) -> anyhow::Result<bool> {
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .is_some_and(|rows| rows.remove(id).is_some()))
    }

    async fn query(
        &self,
        table: &str,
        predicate: DocumentPredicate<'_>,
    ) -> anyhow::Result<Vec<Value>> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&(u64, Value)> =
            rows.values().filter(|(_, doc)| predicate(doc)).collect();
        matching.sort_by_key(|(seq, _)| *seq);
        Ok(matching.into_iter().map(|(_, doc)| doc.clone()).collect())
    }
}
