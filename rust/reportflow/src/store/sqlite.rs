//! `SQLite` document store.
//!
//! One `documents` table holds every record as JSON text:
//!
//! ```text
//! documents(table_name TEXT, id TEXT, body TEXT, updated_at INTEGER,
//!           PRIMARY KEY (table_name, id))
//! ```
//!
//! Write-Ahead Logging is enabled for file databases. All statements run on
//! the blocking thread pool.
//!
//! ```rust,ignore
//! let store = SqliteStore::new("./data/reportflow.db").await?;
//! store.upsert("reports", "r-1", serde_json::json!({"name": "Sales"})).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::task;

use super::{DocumentPredicate, DurableStore};

/// SQLite-backed [`DurableStore`].
///
/// A single connection is shared behind a mutex; `:memory:` gives each store
/// its own private database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and migrate the schema.
    pub async fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let open_path = path.clone();

        let conn = task::spawn_blocking(move || -> Result<Connection> {
            let in_memory = open_path.to_str() == Some(":memory:");
            if !in_memory {
                if let Some(parent) = open_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }

            let conn = if in_memory {
                Connection::open_in_memory()
            } else {
                Connection::open(&open_path)
            }
            .context("Failed to open database")?;

            if !in_memory {
                conn.pragma_update(None, "journal_mode", "WAL")
                    .context("Failed to enable WAL mode")?;
            }

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS documents (
                    table_name TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (table_name, id)
                )
                ",
                [],
            )
            .context("Failed to create documents table")?;

            Ok(conn)
        })
        .await
        .context("Failed to spawn blocking task")??;

        tracing::debug!(path = %path.display(), "SQLite store opened");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database path as configured.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("Failed to spawn blocking task")?
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert(&self, table: &str, id: &str, document: Value) -> Result<()> {
        let table = table.to_string();
        let id = id.to_string();
        let body = serde_json::to_string(&document).context("Failed to serialize document")?;

        self.with_conn(move |conn| {
            conn.execute(
                r"
                INSERT INTO documents (table_name, id, body, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(table_name, id) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at
                ",
                params![&table, &id, &body, chrono::Utc::now().timestamp_millis()],
            )
            .with_context(|| format!("Failed to upsert {table}/{id}"))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let table = table.to_string();
        let id = id.to_string();

        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM documents WHERE table_name = ?1 AND id = ?2",
                    params![&table, &id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to read document")
            })
            .await?;

        body.map(|b| serde_json::from_str(&b).context("Failed to deserialize document"))
            .transpose()
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let table = table.to_string();
        let id = id.to_string();

        self.with_conn(move |conn| {
            let count = conn
                .execute(
                    "DELETE FROM documents WHERE table_name = ?1 AND id = ?2",
                    params![&table, &id],
                )
                .context("Failed to delete document")?;
            Ok(count > 0)
        })
        .await
    }

    async fn query(&self, table: &str, predicate: DocumentPredicate<'_>) -> Result<Vec<Value>> {
        let table = table.to_string();

        let bodies: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT body FROM documents WHERE table_name = ?1 ORDER BY rowid ASC")
                    .context("Failed to prepare query")?;
                let rows = stmt
                    .query_map(params![&table], |row| row.get(0))
                    .context("Failed to execute query")?;

                let mut bodies = Vec::new();
                for body in rows {
                    bodies.push(body.context("Failed to read document")?);
                }
                Ok(bodies)
            })
            .await?;

        let mut documents = Vec::with_capacity(bodies.len());
        for body in bodies {
            let doc: Value = serde_json::from_str(&body).context("Failed to deserialize document")?;
            if predicate(&doc) {
                documents.push(doc);
            }
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_memory_databases_are_isolated() {
        let a = SqliteStore::new(":memory:").await.unwrap();
        let b = SqliteStore::new(":memory:").await.unwrap();

        a.upsert("reports", "r1", json!({"name": "A"})).await.unwrap();
        assert!(b.get("reports", "r1").await.unwrap().is_none());
        assert_eq!(a.get("reports", "r1").await.unwrap(), Some(json!({"name": "A"})));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_keeps_order() {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(temp.path()).await.unwrap();

        store.upsert("t", "first", json!({"n": 1})).await.unwrap();
        store.upsert("t", "second", json!({"n": 2})).await.unwrap();
        store.upsert("t", "first", json!({"n": 3})).await.unwrap();

        let docs = store.list("t").await.unwrap();
        assert_eq!(docs, vec![json!({"n": 3}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_query_and_delete() {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(temp.path()).await.unwrap();

        store.upsert("logs", "1", json!({"schedule_id": "a"})).await.unwrap();
        store.upsert("logs", "2", json!({"schedule_id": "b"})).await.unwrap();
        store.upsert("other", "3", json!({"schedule_id": "a"})).await.unwrap();

        let found = store
            .query("logs", &|doc| doc["schedule_id"] == "a")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        assert!(store.delete("logs", "1").await.unwrap());
        assert!(!store.delete("logs", "1").await.unwrap());
        assert_eq!(store.list("logs").await.unwrap().len(), 1);
    }
}
