//! Directory document loader.
//!
//! Walks a corpus directory, dispatches each recognized file to
//! [`extract`](crate::extract) and tags the result with size, format and
//! detected language. Per-file problems (unsupported extension, oversized
//! file, extraction failure, empty text) are logged and recorded as
//! [`SkippedFile`]s; only a missing root directory fails the whole load.

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::extract::{extract_text, ExtractError};
use crate::models::{Document, FileFormat, Language};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid exclude glob: {0}")]
    Glob(#[from] globset::Error),
}

/// Why a file was left out of a load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("unsupported extension: .{0}")]
    UnsupportedExtension(String),
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("no extractable text")]
    EmptyText,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Everything a directory load produced.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    max_document_bytes: u64,
    exclude_set: GlobSet,
    follow_symlinks: bool,
}

impl DocumentLoader {
    pub fn new(config: &LoaderConfig) -> Result<Self, LoadError> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            max_document_bytes: config.max_document_bytes,
            exclude_set: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Load every recognized file under `root`, sorted by relative path.
    pub fn load_directory(&self, root: &Path) -> Result<LoadOutcome, LoadError> {
        if !root.exists() {
            tracing::error!(path = %root.display(), "directory does not exist");
            return Err(LoadError::DirectoryNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(LoadError::NotADirectory(root.to_path_buf()));
        }

        let mut outcome = LoadOutcome::default();

        for entry in WalkDir::new(root).follow_links(self.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude_set.is_match(&rel_str) {
                continue;
            }

            match self.load_file(path, &rel_str) {
                Ok(doc) => {
                    tracing::debug!(file = %rel_str, language = %doc.language, "processed");
                    outcome.documents.push(doc);
                }
                Err(reason) => {
                    tracing::warn!(file = %rel_str, reason = %reason, "skipping file");
                    outcome.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
            }
        }

        outcome.documents.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(
            root = %root.display(),
            documents = outcome.documents.len(),
            skipped = outcome.skipped.len(),
            "loaded directory"
        );
        Ok(outcome)
    }

    /// Load a single file; `source_id` becomes the document id.
    pub fn load_file(&self, path: &Path, source_id: &str) -> Result<Document, SkipReason> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let format = FileFormat::from_extension(&ext)
            .ok_or_else(|| SkipReason::UnsupportedExtension(ext.clone()))?;

        let metadata = std::fs::metadata(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        let size = metadata.len();
        if size > self.max_document_bytes {
            return Err(SkipReason::TooLarge {
                size,
                limit: self.max_document_bytes,
            });
        }

        let bytes = std::fs::read(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        let text = extract_text(&bytes, format)
            .map_err(|e: ExtractError| SkipReason::ExtractionFailed(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(SkipReason::EmptyText);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_id.to_string());

        Ok(Document {
            id: source_id.to_string(),
            filename,
            path: path.to_path_buf(),
            language: Language::detect(&text),
            text,
            byte_size: size,
            format,
            ingested_at: Utc::now(),
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, LoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
