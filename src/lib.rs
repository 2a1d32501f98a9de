//! Ephemeral Store is an embedded, file-backed store for short-lived records.
//!
//! Records live in named tables (`Table -> Key -> Entry`). Every entry carries
//! an absolute expiry and is purged lazily whenever its table is touched. The
//! whole image is persisted as one JSON file by a background flusher, and the
//! file is re-read on access so that restarts and other processes observe
//! each other's writes.
//!
//! ## Core Components
//! - [`engine`]: entries, tables, persistence, the read cache and the [`Store`] engine.
//! - [`config`]: [`StoreConfig`] and the [`ReloadPolicy`].
//!
//! ## Example
//!
//! ```no_run
//! use ephemeral_store::{EntryReader, EntryWriter, ExpiryPolicy, Store, StoreConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Store::open(StoreConfig::default().with_path("storage.json"))?;
//!     store.set("u1", json!({"a": 1}), "sessions", ExpiryPolicy::Default).await?;
//!     let entry = store.get("u1", "sessions").await?;
//!     assert!(entry.is_some());
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;

pub use config::{ReloadPolicy, StoreConfig};
pub use engine::{Entry, ExpiryPolicy, Store, StoreImage, Table};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors returned by the store.
#[derive(Error, Debug)]
pub enum Error {
    /// A predicate lookup matched no entry.
    #[error("entry not found")]
    NotFound,
    /// Both long-lived and short-lived expiry were requested for one write.
    #[error("conflicting expiry policy: long-lived and short-lived are mutually exclusive")]
    ConflictingPolicy,
    /// The backing file is empty or could not be parsed.
    ///
    /// The engine recovers from this by resetting to an empty image; it is
    /// only visible when using [`engine::Persistence`] directly.
    #[error("corrupted backing file: {0}")]
    Corrupted(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred while reading or writing the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read operations over a table.
///
/// Every call purges expired entries of `table` first and creates the table
/// if it does not exist yet. Missing tables and keys are never errors.
#[async_trait]
pub trait EntryReader: Send + Sync {
    /// Returns the live entry stored at `key`, if any.
    async fn get(&self, key: &str, table: &str) -> Result<Option<Entry>>;
    /// Returns every live entry of `table`, or `None` when the table is empty.
    async fn get_all(&self, table: &str) -> Result<Option<HashMap<String, Entry>>>;
    /// Returns the first entry whose value has `field` equal to `value`.
    ///
    /// Fails with [`Error::NotFound`] when nothing matches.
    async fn get_by_predicate(&self, field: &str, value: &Value, table: &str) -> Result<Entry>;
}

/// Write operations over a table.
#[async_trait]
pub trait EntryWriter: Send + Sync {
    /// Stores a fresh entry at `key`, replacing whatever was there.
    async fn set(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry>;
    /// Replaces the value at `key`, keeping its creation time and restarting its expiry window.
    ///
    /// Behaves like [`EntryWriter::set`] when `key` is absent.
    async fn update(&self, key: &str, value: Value, table: &str, policy: ExpiryPolicy) -> Result<Entry>;
    /// Removes `key` from `table` if present.
    async fn delete(&self, key: &str, table: &str) -> Result<()>;
    /// Empties one table, or every table when `table` is `None`. Table names are kept.
    async fn clear(&self, table: Option<&str>) -> Result<()>;
}

/// Table management.
#[async_trait]
pub trait TableAdmin: Send + Sync {
    /// Creates an empty table. Returns `None` when the table already exists.
    async fn create_table(&self, name: &str) -> Result<Option<Table>>;
    /// Lists all table names in ascending order.
    async fn table_names(&self) -> Result<Vec<String>>;
}

/// The complete store interface.
#[async_trait]
pub trait EphemeralStore: EntryReader + EntryWriter + TableAdmin {
    /// Returns a [`TableScope`] pinned to one table.
    fn table(&self, name: &str) -> Box<dyn TableScope + '_>;
}

/// A simplified interface pinned to a single table.
#[async_trait]
pub trait TableScope: Send + Sync {
    /// The table this scope operates on.
    fn name(&self) -> &str;
    /// Retrieves an entry from the scoped table.
    async fn get(&self, key: &str) -> Result<Option<Entry>>;
    /// Retrieves every live entry from the scoped table.
    async fn get_all(&self) -> Result<Option<HashMap<String, Entry>>>;
    /// Finds an entry in the scoped table by a field of its value.
    async fn get_by_predicate(&self, field: &str, value: &Value) -> Result<Entry>;
    /// Stores an entry in the scoped table.
    async fn set(&self, key: &str, value: Value, policy: ExpiryPolicy) -> Result<Entry>;
    /// Updates an entry in the scoped table.
    async fn update(&self, key: &str, value: Value, policy: ExpiryPolicy) -> Result<Entry>;
    /// Deletes an entry from the scoped table.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Empties the scoped table.
    async fn clear(&self) -> Result<()>;
}
