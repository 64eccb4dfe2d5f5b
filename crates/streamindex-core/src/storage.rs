//! Storage manager — durable keeper of per-indexer state and provider of
//! cursor-scoped, transactional write handles.
//!
//! The manager persists two things across runs (and process restarts): the
//! last committed cursor and the merged stream configuration. Handlers never
//! touch the manager directly; they write through a [`StorageScope`] bound to
//! exactly one cursor, opened immediately before the handler runs and
//! committed immediately after, regardless of the handler's outcome.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StreamConfiguration;
use crate::cursor::Cursor;
use crate::error::RunnerError;

/// A transactional write handle bound to exactly one cursor.
///
/// All writes made through a scope become visible atomically when the runner
/// commits it — either every write for the cursor is visible, or none.
/// Reads see committed state overlaid with the scope's own pending writes.
#[async_trait]
pub trait StorageScope: Send {
    /// The cursor this scope is bound to.
    fn cursor(&self) -> Cursor;

    /// Stage an insert (or replace) of a document under `key`.
    async fn insert(&mut self, key: &str, value: Value) -> Result<(), RunnerError>;

    /// Read a document, seeing this scope's pending writes first.
    async fn get(&self, key: &str) -> Result<Option<Value>, RunnerError>;

    /// Stage a delete of the document under `key`.
    async fn delete(&mut self, key: &str) -> Result<(), RunnerError>;

    /// Apply all staged writes and advance (or rewind) the persisted cursor.
    ///
    /// Called by the runner when the scope is released; handlers should not
    /// call it.
    async fn commit(&mut self) -> Result<(), RunnerError>;
}

/// Durable keeper of per-indexer state.
///
/// All persisted state is namespaced by the indexer identity passed to
/// [`namespace`](Self::namespace); the runner calls it once per run, before
/// anything else. Two simultaneously running indexers under the same identity
/// are undefined behavior — the contract assumes one writer per namespace.
#[async_trait]
pub trait StorageManager: Send {
    type Scope: StorageScope + Send;

    /// Bind this manager to the given indexer identity.
    async fn namespace(&mut self, identity: &str) -> Result<(), RunnerError>;

    /// Wipe every document, cursor, and configuration in the namespace.
    /// Invoked only when a reset was explicitly requested.
    async fn drop_all(&mut self) -> Result<(), RunnerError>;

    /// Merge a freshly declared configuration with persisted state.
    ///
    /// A cursor persisted by a previous run overrides
    /// `declared.starting_cursor`, making the stream resumable; a fresh
    /// namespace returns the declaration unchanged. The merged configuration
    /// is persisted either way.
    async fn merge_configuration(
        &mut self,
        declared: StreamConfiguration,
    ) -> Result<StreamConfiguration, RunnerError>;

    /// Open a scope for a `Data` message. Committing it advances the
    /// persisted cursor to `end_cursor`.
    async fn open_scope_for_data(&mut self, end_cursor: Cursor)
        -> Result<Self::Scope, RunnerError>;

    /// Open a scope for an `Invalidate` message. Committing it removes every
    /// document inserted after `cursor` and rewinds the persisted cursor to
    /// it.
    async fn open_scope_for_invalidate(
        &mut self,
        cursor: Cursor,
    ) -> Result<Self::Scope, RunnerError>;
}

// ─── In-memory backend ───────────────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A committed document and the cursor it was inserted at.
#[derive(Debug, Clone)]
struct Document {
    value: Value,
    inserted_at: Cursor,
}

#[derive(Debug, Default)]
struct NamespaceState {
    cursor: Option<Cursor>,
    configuration: Option<StreamConfiguration>,
    documents: HashMap<String, Document>,
    updated_at: i64,
}

type SharedState = Arc<Mutex<HashMap<String, NamespaceState>>>;

/// In-memory storage manager.
///
/// All state is lost when the last handle is dropped. Useful for tests and
/// ephemeral indexers that don't need persistence across restarts.
#[derive(Default)]
pub struct MemoryStorage {
    state: SharedState,
    identity: Option<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A second handle over the same underlying state. Lets a test run two
    /// consecutive runners against one "database".
    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            identity: None,
        }
    }

    /// The last committed cursor for an identity, if any.
    pub fn persisted_cursor(&self, identity: &str) -> Option<Cursor> {
        self.state.lock().unwrap().get(identity).and_then(|ns| ns.cursor)
    }

    /// A committed document, ignoring any open scope.
    pub fn committed_document(&self, identity: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .get(identity)
            .and_then(|ns| ns.documents.get(key))
            .map(|doc| doc.value.clone())
    }

    /// Unix timestamp of the last commit for an identity (0 = never).
    pub fn updated_at(&self, identity: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .get(identity)
            .map(|ns| ns.updated_at)
            .unwrap_or(0)
    }

    /// Number of committed documents for an identity.
    pub fn document_count(&self, identity: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get(identity)
            .map(|ns| ns.documents.len())
            .unwrap_or(0)
    }

    fn identity(&self) -> Result<&str, RunnerError> {
        self.identity
            .as_deref()
            .ok_or_else(|| RunnerError::Storage("storage namespace not initialized".into()))
    }
}

#[async_trait]
impl StorageManager for MemoryStorage {
    type Scope = MemoryScope;

    async fn namespace(&mut self, identity: &str) -> Result<(), RunnerError> {
        self.state
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_default();
        self.identity = Some(identity.to_string());
        Ok(())
    }

    async fn drop_all(&mut self) -> Result<(), RunnerError> {
        let identity = self.identity()?.to_string();
        self.state
            .lock()
            .unwrap()
            .insert(identity.clone(), NamespaceState::default());
        tracing::debug!(identity = %identity, "storage namespace wiped");
        Ok(())
    }

    async fn merge_configuration(
        &mut self,
        declared: StreamConfiguration,
    ) -> Result<StreamConfiguration, RunnerError> {
        let identity = self.identity()?.to_string();
        let mut state = self.state.lock().unwrap();
        let ns = state.entry(identity).or_default();

        let mut effective = declared;
        if let Some(cursor) = ns.cursor {
            effective.starting_cursor = Some(cursor);
        }
        ns.configuration = Some(effective.clone());
        Ok(effective)
    }

    async fn open_scope_for_data(
        &mut self,
        end_cursor: Cursor,
    ) -> Result<Self::Scope, RunnerError> {
        Ok(MemoryScope {
            state: Arc::clone(&self.state),
            identity: self.identity()?.to_string(),
            cursor: end_cursor,
            kind: ScopeKind::Data,
            writes: Vec::new(),
        })
    }

    async fn open_scope_for_invalidate(
        &mut self,
        cursor: Cursor,
    ) -> Result<Self::Scope, RunnerError> {
        Ok(MemoryScope {
            state: Arc::clone(&self.state),
            identity: self.identity()?.to_string(),
            cursor,
            kind: ScopeKind::Invalidate,
            writes: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Data,
    Invalidate,
}

#[derive(Debug, Clone)]
enum WriteOp {
    Insert(String, Value),
    Delete(String),
}

/// Scope over [`MemoryStorage`]. Writes are buffered and applied under one
/// lock on commit, together with the cursor update.
pub struct MemoryScope {
    state: SharedState,
    identity: String,
    cursor: Cursor,
    kind: ScopeKind,
    writes: Vec<WriteOp>,
}

#[async_trait]
impl StorageScope for MemoryScope {
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
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(&self.identity)
            .and_then(|ns| ns.documents.get(key))
            .map(|doc| doc.value.clone()))
    }

    async fn delete(&mut self, key: &str) -> Result<(), RunnerError> {
        self.writes.push(WriteOp::Delete(key.to_string()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RunnerError> {
        let mut state = self.state.lock().unwrap();
        let ns = state.entry(self.identity.clone()).or_default();

        if self.kind == ScopeKind::Invalidate {
            let cursor = self.cursor;
            ns.documents.retain(|_, doc| doc.inserted_at <= cursor);
        }

        for write in self.writes.drain(..) {
            match write {
                WriteOp::Insert(key, value) => {
                    ns.documents.insert(
                        key,
                        Document {
                            value,
                            inserted_at: self.cursor,
                        },
                    );
                }
                WriteOp::Delete(key) => {
                    ns.documents.remove(&key);
                }
            }
        }

        ns.cursor = Some(self.cursor);
        ns.updated_at = chrono::Utc::now().timestamp();
        tracing::debug!(identity = %self.identity, cursor = %self.cursor, "scope committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Filter;
    use serde_json::json;

    async fn namespaced() -> MemoryStorage {
        let mut storage = MemoryStorage::new();
        storage.namespace("test-indexer").await.unwrap();
        storage
    }

    #[tokio::test]
    async fn scope_writes_invisible_until_commit() {
        let mut storage = namespaced().await;

        let mut scope = storage.open_scope_for_data(Cursor::new(100)).await.unwrap();
        scope.insert("a", json!({"v": 1})).await.unwrap();
        assert_eq!(storage.document_count("test-indexer"), 0);

        scope.commit().await.unwrap();
        assert_eq!(storage.document_count("test-indexer"), 1);
        assert_eq!(storage.persisted_cursor("test-indexer"), Some(Cursor::new(100)));
        assert!(storage.updated_at("test-indexer") > 0);
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
    async fn invalidate_prunes_later_documents_and_rewinds_cursor() {
        let mut storage = namespaced().await;

        for n in [100u64, 101, 102] {
            let mut scope = storage.open_scope_for_data(Cursor::new(n)).await.unwrap();
            scope.insert(&format!("doc-{n}"), json!(n)).await.unwrap();
            scope.commit().await.unwrap();
        }
        assert_eq!(storage.document_count("test-indexer"), 3);

        let mut scope = storage
            .open_scope_for_invalidate(Cursor::new(100))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        // doc-100 survives; 101 and 102 are pruned
        assert_eq!(storage.document_count("test-indexer"), 1);
        assert!(storage.committed_document("test-indexer", "doc-100").is_some());
        assert_eq!(storage.persisted_cursor("test-indexer"), Some(Cursor::new(100)));
    }

    #[tokio::test]
    async fn merge_overrides_starting_cursor_with_persisted() {
        let mut storage = namespaced().await;

        let declared = StreamConfiguration::with_filter(Filter::from_bytes(b"f".to_vec()))
            .starting_cursor(100u64);

        // Fresh namespace: declaration passes through
        let effective = storage.merge_configuration(declared.clone()).await.unwrap();
        assert_eq!(effective.starting_cursor, Some(Cursor::new(100)));

        // Persist a cursor, merge again: persisted wins
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
        assert_eq!(storage.document_count("test-indexer"), 0);
        assert!(storage.persisted_cursor("test-indexer").is_none());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let mut a = MemoryStorage::new();
        a.namespace("indexer-a").await.unwrap();
        let mut b = a.handle();
        b.namespace("indexer-b").await.unwrap();

        let mut scope = a.open_scope_for_data(Cursor::new(1)).await.unwrap();
        scope.insert("k", json!("a")).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(a.document_count("indexer-a"), 1);
        assert_eq!(b.document_count("indexer-b"), 0);
        assert!(b.persisted_cursor("indexer-b").is_none());
    }
}
