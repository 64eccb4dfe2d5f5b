//! streamindex-storage — durable storage backends for StreamIndex.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//! - in-memory — `streamindex_core::storage::MemoryStorage` (dev/testing)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorageManager;
