//! Core data models used throughout the knowledge base.
//!
//! These types represent the documents, chunks, index entries, retrieval
//! results and answers that flow through the ingestion and query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Fraction of alphabetic characters that must be Arabic for text to be
/// tagged [`Language::Ar`].
const ARABIC_RATIO_THRESHOLD: f64 = 0.3;

/// Language tag attached to documents, chunks and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ar,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }

    /// Heuristic script-based detection.
    ///
    /// Counts characters in the Arabic block (U+0600..=U+06FF) against all
    /// alphabetic characters; above 30% the text is Arabic.
    pub fn detect(text: &str) -> Language {
        let mut alphabetic = 0usize;
        let mut arabic = 0usize;
        for c in text.chars() {
            if ('\u{0600}'..='\u{06FF}').contains(&c) {
                arabic += 1;
            }
            if c.is_alphabetic() {
                alphabetic += 1;
            }
        }
        if alphabetic > 0 && arabic as f64 / alphabetic as f64 > ARABIC_RATIO_THRESHOLD {
            Language::Ar
        } else {
            Language::En
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ar" => Ok(Language::Ar),
            other => Err(format!("unknown language '{}': expected en or ar", other)),
        }
    }
}

/// Recognized source file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Text,
    Pdf,
    Docx,
    Csv,
    Json,
    Markdown,
}

impl FileFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<FileFormat> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(FileFormat::Text),
            "pdf" => Some(FileFormat::Pdf),
            "docx" => Some(FileFormat::Docx),
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            "md" => Some(FileFormat::Markdown),
            _ => None,
        }
    }

    /// Short tag reported in sources and stats (`".pdf"` style).
    pub fn tag(&self) -> &'static str {
        match self {
            FileFormat::Text => ".txt",
            FileFormat::Pdf => ".pdf",
            FileFormat::Docx => ".docx",
            FileFormat::Csv => ".csv",
            FileFormat::Json => ".json",
            FileFormat::Markdown => ".md",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A raw ingested unit. Immutable once created; re-ingestion produces a
/// new `Document` rather than mutating an old one.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source identifier: path relative to the ingested directory.
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    pub text: String,
    pub byte_size: u64,
    pub language: Language,
    pub format: FileFormat,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded segment of one document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub format: FileFormat,
    pub language: Language,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk together with its embedding, as stored in the vector index.
///
/// `norm` is the Euclidean norm of `embedding`, precomputed at insert
/// time so a search only needs one dot product per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub norm: f32,
}

/// One ranked hit from a vector search.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// A cited source attached to an [`Answer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub score: f32,
    pub format: String,
    pub language: Language,
}

/// The result of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
    /// In `[0, 1]`, rounded to two decimals.
    pub confidence: f64,
    pub language: Language,
    /// `"template"`, a model name, or `"fallback"` for error answers.
    pub composed_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
}

/// Per-document line of an [`IngestReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub format: FileFormat,
    pub language: Language,
    pub byte_size: u64,
    pub chunks: usize,
}

/// A file the loader left out, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSummary {
    /// Path relative to the ingested directory.
    pub path: String,
    pub reason: String,
}

/// Structured outcome of `KnowledgeBase::ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub documents_processed: usize,
    pub chunks_processed: usize,
    pub embeddings_generated: usize,
    pub entries_inserted: usize,
    pub files_skipped: usize,
    pub skipped: Vec<SkippedSummary>,
    pub documents: Vec<DocumentSummary>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IngestReport {
    pub fn success() -> Self {
        Self {
            status: IngestStatus::Success,
            documents_processed: 0,
            chunks_processed: 0,
            embeddings_generated: 0,
            entries_inserted: 0,
            files_skipped: 0,
            skipped: Vec::new(),
            documents: Vec::new(),
            warnings: Vec::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Error,
            error: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IngestStatus::Success
    }
}

/// Embedding provider descriptor reported by `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub batch_size: Option<usize>,
}

/// Snapshot of the knowledge base, as returned by `KnowledgeBase::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub state: String,
    pub document_count: usize,
    pub embedding_count: usize,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub index_backend: String,
    pub embedding: EmbeddingInfo,
    pub answer_synthesizer: String,
}
