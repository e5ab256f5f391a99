//! In-memory vector index with exhaustive cosine-similarity search.
//!
//! [`VectorIndex`] stores [`IndexEntry`] tuples (chunk, embedding, norm)
//! and answers top-k queries by scoring every entry. Insertion is
//! append-only and never deduplicates: inserting the same text twice
//! yields two independent entries.
//!
//! # Scaling limit
//!
//! Search is a linear scan, `O(entries × dims)` per query. That is fine for
//! tens to low hundreds of documents; a larger corpus would need an
//! approximate nearest-neighbor structure behind the same `insert`/`search`
//! surface.
//!
//! # Sharing
//!
//! The index is plain owned data. Callers that share it wrap it in a
//! [`SharedIndex`] (`Arc<tokio::sync::RwLock<_>>`): searches take the read
//! lock and may run concurrently, inserts take the write lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Chunk, IndexEntry, RetrievalResult};
use crate::storage::{FlatFileStorage, IndexStorage, StorageError};

/// Lock-guarded handle to an index shared between callers.
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

/// Snapshot format version written by the storage backends.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding for chunk {chunk_id} has dimension {actual}, index expects {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("snapshot dimension {actual} does not match index dimension {expected}")]
    SnapshotDimension { expected: usize, actual: usize },
    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Serializable state of an index, as written by [`IndexStorage`] backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub dims: usize,
    pub updated_at: Option<DateTime<Utc>>,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    similarity_threshold: f32,
    entries: Vec<IndexEntry>,
    updated_at: Option<DateTime<Utc>>,
}

impl VectorIndex {
    pub fn new(dims: usize, similarity_threshold: f32) -> Self {
        Self {
            dims,
            similarity_threshold,
            entries: Vec::new(),
            updated_at: None,
        }
    }

    pub fn shared(self) -> SharedIndex {
        Arc::new(RwLock::new(self))
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    pub fn set_similarity_threshold(&mut self, threshold: f32) {
        self.similarity_threshold = threshold;
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct source documents with at least one entry.
    pub fn document_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Append a batch of (chunk, embedding) pairs.
    ///
    /// The batch is validated first: if any embedding has the wrong
    /// dimension nothing is inserted.
    pub fn insert(&mut self, items: Vec<(Chunk, Vec<f32>)>) -> Result<usize, IndexError> {
        if let Some((chunk, embedding)) = items.iter().find(|(_, e)| e.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                chunk_id: chunk.id.clone(),
                expected: self.dims,
                actual: embedding.len(),
            });
        }

        let inserted = items.len();
        self.entries.extend(items.into_iter().map(|(chunk, embedding)| {
            let norm = l2_norm(&embedding);
            IndexEntry {
                chunk,
                embedding,
                norm,
            }
        }));
        if inserted > 0 {
            self.updated_at = Some(Utc::now());
        }
        Ok(inserted)
    }

    /// Top-`k` entries by cosine similarity, descending, restricted to
    /// scores at or above the configured threshold.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievalResult> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_with_norms(query, query_norm, &entry.embedding, entry.norm), entry))
            .filter(|(score, _)| *score >= self.similarity_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, entry)| RetrievalResult {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect()
    }

    /// Remove every entry of one document, returning how many were removed.
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.chunk.document_id != document_id);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.updated_at = Some(Utc::now());
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.updated_at = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            dims: self.dims,
            updated_at: self.updated_at,
            entries: self.entries.clone(),
        }
    }

    /// Rebuild an index from a snapshot. Norms are recomputed rather than
    /// trusted from storage.
    pub fn from_snapshot(
        snapshot: IndexSnapshot,
        dims: usize,
        similarity_threshold: f32,
    ) -> Result<Self, IndexError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::SnapshotVersion(snapshot.version));
        }
        if snapshot.dims != dims {
            return Err(IndexError::SnapshotDimension {
                expected: dims,
                actual: snapshot.dims,
            });
        }

        let mut index = Self::new(dims, similarity_threshold);
        for mut entry in snapshot.entries {
            if entry.embedding.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    chunk_id: entry.chunk.id,
                    expected: dims,
                    actual: entry.embedding.len(),
                });
            }
            entry.norm = l2_norm(&entry.embedding);
            index.entries.push(entry);
        }
        index.updated_at = snapshot.updated_at;
        Ok(index)
    }

    /// Write the index to a flat file at `path`.
    pub async fn save(&self, path: &Path) -> Result<(), IndexError> {
        FlatFileStorage::new(path).save(&self.snapshot()).await?;
        Ok(())
    }

    /// Read an index previously written by [`save`](VectorIndex::save).
    /// A missing file yields an empty index.
    pub async fn load(
        path: &Path,
        dims: usize,
        similarity_threshold: f32,
    ) -> Result<Self, IndexError> {
        match FlatFileStorage::new(path).load().await? {
            Some(snapshot) => Self::from_snapshot(snapshot, dims, similarity_threshold),
            None => Ok(Self::new(dims, similarity_threshold)),
        }
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    let sum: f64 = v.iter().map(|x| (*x as f64) * (*x as f64)).sum();
    let norm = sum.sqrt() as f32;
    if norm.is_finite() {
        norm
    } else {
        0.0
    }
}

fn cosine_with_norms(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let denom = norm_a as f64 * norm_b as f64;
    if denom < f32::EPSILON as f64 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let sim = (dot / denom) as f32;
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// whenever either vector has zero norm.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}
