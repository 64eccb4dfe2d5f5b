//! SQLite storage backend for StreamIndex.
//!
//! Persists the per-indexer checkpoint cursor, the merged stream
//! configuration, and scoped documents to a single SQLite file. Uses `sqlx`
//! with WAL mode for concurrent read performance. Scope writes are buffered
//! and applied inside one transaction together with the checkpoint update, so
//! every document is atomically associated with the cursor it was written
//! under.
//!
//! # Usage
//! ```rust,no_run
//! use streamindex_storage::sqlite::SqliteStorageManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorageManager::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorageManager::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use streamindex_core::config::StreamConfiguration;
use streamindex_core::cursor::Cursor;
use streamindex_core::error::RunnerError;
use streamindex_core::storage::{StorageManager, StorageScope};

fn storage_err(e: impl std::fmt::Display) -> RunnerError {
    RunnerError::Storage(e.to_string())
}

/// SQLite-backed storage manager.
pub struct SqliteStorageManager {
    pool: SqlitePool,
    identity: Option<String>,
}

impl SqliteStorageManager {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, RunnerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self {
            pool,
            identity: None,
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, RunnerError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self {
            pool,
            identity: None,
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), RunnerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                indexer_id TEXT    NOT NULL,
                order_key  INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (indexer_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS configurations (
                indexer_id  TEXT NOT NULL,
                config_json TEXT NOT NULL,
                PRIMARY KEY (indexer_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                indexer_id  TEXT    NOT NULL,
                doc_key     TEXT    NOT NULL,
                value_json  TEXT    NOT NULL,
                inserted_at INTEGER NOT NULL,
                PRIMARY KEY (indexer_id, doc_key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_inserted
             ON documents (indexer_id, inserted_at);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    fn identity(&self) -> Result<&str, RunnerError> {
        self.identity
            .as_deref()
            .ok_or_else(|| RunnerError::Storage("storage namespace not initialized".into()))
    }

    /// The last committed cursor for an identity, if any.
    pub async fn persisted_cursor(&self, identity: &str) -> Result<Option<Cursor>, RunnerError> {
        let row = sqlx::query("SELECT order_key FROM checkpoints WHERE indexer_id = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| Cursor::new(r.get::<i64, _>("order_key") as u64)))
    }

    /// Number of committed documents for an identity.
    pub async fn document_count(&self, identity: &str) -> Result<u64, RunnerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM documents WHERE indexer_id = ?")
            .bind(identity)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl StorageManager for SqliteStorageManager {
    type Scope = SqliteScope;

    async fn namespace(&mut self, identity: &str) -> Result<(), RunnerError> {
        self.identity = Some(identity.to_string());
        Ok(())
    }

    async fn drop_all(&mut self) -> Result<(), RunnerError> {
        let identity = self.identity()?.to_string();

        sqlx::query("DELETE FROM checkpoints WHERE indexer_id = ?")
            .bind(&identity)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM configurations WHERE indexer_id = ?")
            .bind(&identity)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM documents WHERE indexer_id = ?")
            .bind(&identity)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(identity = %identity, "storage namespace wiped");
        Ok(())
    }

    async fn merge_configuration(
        &mut self,
        declared: StreamConfiguration,
    ) -> Result<StreamConfiguration, RunnerError> {
        let identity = self.identity()?.to_string();

        let mut effective = declared;
        if let Some(cursor) = self.persisted_cursor(&identity).await? {
            effective.starting_cursor = Some(cursor);
        }

        let config_json = serde_json::to_string(&effective).map_err(storage_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO configurations (indexer_id, config_json)
             VALUES (?, ?)",
        )
        .bind(&identity)
        .bind(&config_json)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(effective)
    }

    async fn open_scope_for_data(
        &mut self,
        end_cursor: Cursor,
    ) -> Result<Self::Scope, RunnerError> {
        Ok(SqliteScope {
            pool: self.pool.clone(),
            identity: self.identity()?.to_string(),
            cursor: end_cursor,
            invalidate: false,
            writes: Vec::new(),
        })
    }

    async fn open_scope_for_invalidate(
        &mut self,
        cursor: Cursor,
    ) -> Result<Self::Scope, RunnerError> {
        Ok(SqliteScope {
            pool: self.pool.clone(),
            identity: self.identity()?.to_string(),
            cursor,
            invalidate: true,
            writes: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Insert(String, Value),
    Delete(String),
}

/// Scope over a SQLite database. Writes are buffered and applied inside one
/// transaction on commit, together with the checkpoint update.
pub struct SqliteScope {
    pool: SqlitePool,
    identity: String,
    cursor: Cursor,
    invalidate: bool,
    writes: Vec<WriteOp>,
}

#[async_trait]
impl StorageScope for SqliteScope {
    fn cursor(&self) -> Cursor {
        self.cursor
    }

    async fn insert(&mut self, key: &str, value: Value) -> Result<(), RunnerError> {
        self.writes.push(WriteOp::Insert(key.to_string(), value));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RunnerError> {
        // Pending writes shadow committed state, newest first.
        for write in self.writes.iter().rev() {
            match write {
                WriteOp::Insert(k, v) if k == key => return Ok(Some(v.clone())),
                WriteOp::Delete(k) if k == key => return Ok(None),
                _ => {}
            }
        }

        let row = sqlx::query(
            "SELECT value_json FROM documents WHERE indexer_id = ? AND doc_key = ?",
        )
        .bind(&self.identity)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => {
                let raw: String = r.get("value_json");
                let value = serde_json::from_str(&raw).map_err(storage_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn delete(&mut self, key: &str) -> Result<(), RunnerError> {
        self.writes.push(WriteOp::Delete(key.to_string()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RunnerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        if self.invalidate {
            sqlx::query("DELETE FROM documents WHERE indexer_id = ? AND inserted_at > ?")
                .bind(&self.identity)
                .bind(self.cursor.order_key() as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        for write in self.writes.drain(..) {
            match write {
                WriteOp::Insert(key, value) => {
                    let raw = serde_json::to_string(&value).map_err(storage_err)?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO documents
                         (indexer_id, doc_key, value_json, inserted_at)
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(&self.identity)
                    .bind(&key)
                    .bind(&raw)
                    .bind(self.cursor.order_key() as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                }
                WriteOp::Delete(key) => {
                    sqlx::query("DELETE FROM documents WHERE indexer_id = ? AND doc_key = ?")
                        .bind(&self.identity)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (indexer_id, order_key, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&self.identity)
        .bind(self.cursor.order_key() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!(identity = %self.identity, cursor = %self.cursor, "scope committed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streamindex_core::config::Filter;

    async fn namespaced() -> SqliteStorageManager {
        let mut storage = SqliteStorageManager::in_memory().await.unwrap();
        storage.namespace("test-indexer").await.unwrap();
        storage
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let mut storage = namespaced().await;
        assert!(storage.persisted_cursor("test-indexer").await.unwrap().is_none());

        let mut scope = storage.open_scope_for_data(Cursor::new(1_000)).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(
            storage.persisted_cursor("test-indexer").await.unwrap(),
            Some(Cursor::new(1_000))
        );
    }

    #[tokio::test]
    async fn checkpoint_upsert() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.commit().await.unwrap();
        let mut scope = storage.open_scope_for_data(Cursor::new(200)).await.unwrap();
        scope.commit().await.unwrap();

        // Only one row; the second commit overwrites the first.
        assert_eq!(
            storage.persisted_cursor("test-indexer").await.unwrap(),
            Some(Cursor::new(200))
        );
    }

    #[tokio::test]
    async fn scope_writes_invisible_until_commit() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.insert("a", json!({"v": 1})).await.unwrap();
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 0);

        scope.commit().await.unwrap();
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scope_reads_own_pending_writes() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.insert("a", json!(1)).await.unwrap();
        assert_eq!(scope.get("a").await.unwrap(), Some(json!(1)));

        scope.delete("a").await.unwrap();
        assert_eq!(scope.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn document_value_roundtrip() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope
            .insert("balance", json!({"owner": "0x1", "amount": "999"}))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let scope = storage.open_scope_for_data(Cursor::new(101)).await.unwrap();
        let value = scope.get("balance").await.unwrap().unwrap();
        assert_eq!(value["owner"], "0x1");
        assert_eq!(value["amount"], "999");
    }

    #[tokio::test]
    async fn invalidate_prunes_later_documents_and_rewinds_cursor() {
        let mut storage = namespaced().await;

        for n in [100u64, 101, 102] {
            let mut scope = storage.open_scope_for_data(Cursor::new(n)).await.unwrap();
            scope.insert(&format!("doc-{n}"), json!(n)).await.unwrap();
            scope.commit().await.unwrap();
        }
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 3);

        let mut scope = storage
            .open_scope_for_invalidate(Cursor::new(100))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        // doc-100 survives; 101 and 102 are pruned
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 1);
        assert_eq!(
            storage.persisted_cursor("test-indexer").await.unwrap(),
            Some(Cursor::new(100))
        );
    }

    #[tokio::test]
    async fn merge_overrides_starting_cursor_with_persisted() {
        let mut storage = namespaced().await;

        let declared = StreamConfiguration::with_filter(Filter::from_bytes(b"f".to_vec()))
            .starting_cursor(100u64);

        let effective = storage.merge_configuration(declared.clone()).await.unwrap();
        assert_eq!(effective.starting_cursor, Some(Cursor::new(100)));

        let mut scope = storage.open_scope_for_data(Cursor::new(250)).await.unwrap();
        scope.commit().await.unwrap();

        let effective = storage.merge_configuration(declared).await.unwrap();
        assert_eq!(effective.starting_cursor, Some(Cursor::new(250)));
    }

    #[tokio::test]
    async fn drop_all_wipes_namespace() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.insert("a", json!(1)).await.unwrap();
        scope.commit().await.unwrap();

        storage.drop_all().await.unwrap();
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 0);
        assert!(storage.persisted_cursor("test-indexer").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.insert("k", json!("a")).await.unwrap();
        scope.commit().await.unwrap();

        storage.namespace("other-indexer").await.unwrap();
        let mut scope = storage.open_scope_for_data(Cursor::new(500)).await.unwrap();
        scope.insert("k", json!("b")).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 1);
        assert_eq!(storage.document_count("other-indexer").await.unwrap(), 1);

        // Invalidating one namespace leaves the other untouched.
        let mut scope = storage.open_scope_for_invalidate(Cursor::new(0)).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(storage.document_count("other-indexer").await.unwrap(), 0);
        assert_eq!(storage.document_count("test-indexer").await.unwrap(), 1);
    }
}
