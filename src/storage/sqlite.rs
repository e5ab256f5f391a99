use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{IndexStorage, StorageError};
use crate::index::IndexSnapshot;
use crate::models::{Chunk, FileFormat, IndexEntry, Language};

/// Index snapshot in a SQLite database.
///
/// Embeddings are stored as little-endian `f32` BLOBs. Every save replaces
/// the full contents inside one transaction.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    path: PathBuf,
}

impl SqliteStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn connect(&self) -> Result<SqlitePool, StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        Ok(pool)
    }
}

async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            position INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            format TEXT NOT NULL,
            language TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_document ON entries(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl IndexStorage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), StorageError> {
        let pool = self.connect().await?;
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;

        let updated_at = snapshot
            .updated_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        for (key, value) in [
            ("version", snapshot.version.to_string()),
            ("dims", snapshot.dims.to_string()),
            ("updated_at", updated_at),
        ] {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for (position, entry) in snapshot.entries.iter().enumerate() {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO entries (position, chunk_id, document_id, filename, format,
                                     language, chunk_index, total_chunks, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.filename)
            .bind(chunk.format.tag())
            .bind(chunk.language.as_str())
            .bind(chunk.chunk_index as i64)
            .bind(chunk.total_chunks as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        pool.close().await;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            "index saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<IndexSnapshot>, StorageError> {
        if tokio::fs::metadata(&self.path).await.is_err() {
            return Ok(None);
        }
        let pool = self.connect().await?;

        let meta = sqlx::query("SELECT key, value FROM index_meta")
            .fetch_all(&pool)
            .await?;
        if meta.is_empty() {
            pool.close().await;
            return Ok(None);
        }

        let mut version = None;
        let mut dims = None;
        let mut updated_at = None;
        for row in &meta {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                "version" => version = value.parse::<u32>().ok(),
                "dims" => dims = value.parse::<usize>().ok(),
                "updated_at" if !value.is_empty() => {
                    updated_at = Some(
                        DateTime::parse_from_rfc3339(&value)
                            .map_err(|e| StorageError::Corrupt(format!("updated_at: {}", e)))?
                            .with_timezone(&Utc),
                    );
                }
                _ => {}
            }
        }
        let version = version.ok_or_else(|| StorageError::Corrupt("missing version".into()))?;
        let dims = dims.ok_or_else(|| StorageError::Corrupt("missing dims".into()))?;

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, filename, format, language,
                   chunk_index, total_chunks, text, hash, embedding
            FROM entries
            ORDER BY position
            "#,
        )
        .fetch_all(&pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let format: String = row.try_get("format")?;
            let format = FileFormat::from_extension(format.trim_start_matches('.'))
                .ok_or_else(|| StorageError::Corrupt(format!("unknown format '{}'", format)))?;
            let language: String = row.try_get("language")?;
            let language = language.parse::<Language>().map_err(StorageError::Corrupt)?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            let embedding = blob_to_vec(&blob);

            entries.push(IndexEntry {
                chunk: Chunk {
                    id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    filename: row.try_get("filename")?,
                    format,
                    language,
                    chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
                    total_chunks: row.try_get::<i64, _>("total_chunks")? as usize,
                    text: row.try_get("text")?,
                    hash: row.try_get("hash")?,
                },
                norm: 0.0,
                embedding,
            });
        }
        pool.close().await;

        Ok(Some(IndexSnapshot {
            version,
            dims,
            updated_at,
            entries,
        }))
    }
}

/// Encode a float vector as a BLOB of little-endian `f32` values.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
