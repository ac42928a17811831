//! Write-through repository over a [`DurableStore`].
//!
//! Writes go to the store first and then to memory, so a failed write leaves
//! memory untouched. Reads hit memory and fall back to the store on a miss.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::DurableStore;
use crate::domain::{
    Execution, ExecutionLog, ReportDefinition, ScheduledJob, Subscription, SubscriptionDelivery,
};
use crate::error::CoreResult;

/// A record persisted by id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record_id(&self) -> &str;
}

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(impl Record for $ty {
            fn record_id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_record!(
    ReportDefinition,
    Execution,
    ScheduledJob,
    ExecutionLog,
    Subscription,
    SubscriptionDelivery,
);

/// Typed table with an in-memory mirror.
pub struct Repository<T: Record> {
    table: &'static str,
    store: Arc<dyn DurableStore>,
    cache: RwLock<HashMap<String, T>>,
    /// When false, records are not mirrored in memory (append-only logs).
    mirror: bool,
    _marker: PhantomData<T>,
}

impl<T: Record> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.table)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl<T: Record> Repository<T> {
    pub fn new(table: &'static str, store: Arc<dyn DurableStore>) -> Self {
        Self {
            table,
            store,
            cache: RwLock::new(HashMap::new()),
            mirror: true,
            _marker: PhantomData,
        }
    }

    /// Repository that always reads through to the store.
    pub fn unmirrored(table: &'static str, store: Arc<dyn DurableStore>) -> Self {
        Self {
            mirror: false,
            ..Self::new(table, store)
        }
    }

    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Persist `record`, then mirror it.
    pub async fn save(&self, record: &T) -> CoreResult<()> {
        let document = serde_json::to_value(record)?;
        self.store
            .upsert(self.table, record.record_id(), document)
            .await?;
        if self.mirror {
            self.cache
                .write()
                .insert(record.record_id().to_string(), record.clone());
        }
        Ok(())
    }

    /// Read from memory, falling back to the store.
    pub async fn get(&self, id: &str) -> CoreResult<Option<T>> {
        let cached = self.cache.read().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(document) = self.store.get(self.table, id).await? else {
            return Ok(None);
        };
        let record: T = serde_json::from_value(document)?;
        if self.mirror {
            self.cache.write().insert(id.to_string(), record.clone());
        }
        Ok(Some(record))
    }

    /// Delete from the store, then from memory.
    pub async fn delete(&self, id: &str) -> CoreResult<bool> {
        let existed = self.store.delete(self.table, id).await?;
        let cached = self.cache.write().remove(id).is_some();
        Ok(existed || cached)
    }

    /// Load every stored record into memory and return them in insertion
    /// order.
    pub async fn load_all(&self) -> CoreResult<Vec<T>> {
        let documents = self.store.list(self.table).await?;
        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            records.push(serde_json::from_value::<T>(document)?);
        }

        if self.mirror {
            let mut cache = self.cache.write();
            for record in &records {
                cache.insert(record.record_id().to_string(), record.clone());
            }
        }
        Ok(records)
    }

    /// Stored records whose top-level `field` equals `value`, in insertion
    /// order.
    pub async fn find_by(&self, field: &str, value: &str) -> CoreResult<Vec<T>> {
        let documents = self
            .store
            .query(self.table, &|doc: &Value| {
                doc.get(field).and_then(Value::as_str) == Some(value)
            })
            .await?;

        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            records.push(serde_json::from_value::<T>(document)?);
        }
        Ok(records)
    }

    /// Number of stored records.
    pub async fn count(&self) -> CoreResult<usize> {
        Ok(self.store.list(self.table).await?.len())
    }

    /// Snapshot of the in-memory mirror.
    #[must_use]
    pub fn cached(&self) -> Vec<T> {
        self.cache.read().values().cloned().collect()
    }

    /// Mirrored record by id, without touching the store.
    #[must_use]
    pub fn cached_get(&self, id: &str) -> Option<T> {
        self.cache.read().get(id).cloned()
    }

    /// Drop a record from memory only.
    pub fn evict(&self, id: &str) -> Option<T> {
        self.cache.write().remove(id)
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}
