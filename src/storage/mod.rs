//! Durable storage for the vector index.
//!
//! The in-memory [`VectorIndex`](crate::index::VectorIndex) is persisted as
//! a whole [`IndexSnapshot`] through the [`IndexStorage`] trait. Two
//! backends are provided:
//!
//! | Backend     | Type                | Layout                                   |
//! |-------------|---------------------|------------------------------------------|
//! | `flat_file` | [`FlatFileStorage`] | single bincode file, replaced atomically |
//! | `sqlite`    | [`SqliteStorage`]   | `index_meta` + `entries` tables          |
//!
//! The `memory` backend has no storage at all: [`create_storage`] returns
//! `None` and the index lives only for the process lifetime.

mod flat_file;
mod sqlite;

pub use flat_file::FlatFileStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::config::IndexConfig;
use crate::index::IndexSnapshot;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode index file: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("stored index is corrupt: {0}")]
    Corrupt(String),
}

/// A place an index snapshot can be written to and read back from.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Backend name as used in config (`flat_file`, `sqlite`).
    fn name(&self) -> &str;

    fn location(&self) -> &Path;

    /// Replace whatever is stored with `snapshot`.
    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), StorageError>;

    /// Read the stored snapshot, or `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<IndexSnapshot>, StorageError>;

    /// Bytes occupied on disk; 0 when nothing is stored.
    async fn size_bytes(&self) -> u64 {
        tokio::fs::metadata(self.location())
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Build the storage backend named in config. `memory` yields `None`.
pub fn create_storage(config: &IndexConfig) -> anyhow::Result<Option<Box<dyn IndexStorage>>> {
    match config.backend.as_str() {
        "flat_file" => Ok(Some(Box::new(FlatFileStorage::new(&config.path)))),
        "sqlite" => Ok(Some(Box::new(SqliteStorage::new(&config.path)))),
        "memory" => Ok(None),
        other => anyhow::bail!("Unknown index backend: '{}'", other),
    }
}
