//! Knowledge base orchestration.
//!
//! [`KnowledgeBase`] owns one instance of every pipeline component and
//! exposes the two core operations:
//!
//! ```text
//! ingest(dir):   loader → chunker (per document) → embed_batch → index.insert → persist
//! query(q, k):   embed(q) → index.search(k) → composer.compose
//! ```
//!
//! # States
//!
//! `Uninitialized → Ingesting → Ready`, with `Ready → Ingesting → Ready` on
//! re-ingestion. A failed ingestion returns to whichever state preceded it.
//! Only one ingestion may run at a time; a second call while one is in
//! flight gets an error report.
//!
//! Neither operation returns `Err`: ingestion failures become an
//! [`IngestReport`] with `status = error`, query failures become a
//! zero-confidence fallback [`Answer`].

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::chunk::chunk_document;
use crate::compose::{create_composer, error_answer, AnswerComposer};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::{SharedIndex, VectorIndex};
use crate::loader::DocumentLoader;
use crate::models::{
    Answer, Document, DocumentSummary, IngestReport, Language, SkippedSummary, Stats,
};
use crate::storage::{create_storage, IndexStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KbState {
    Uninitialized,
    Ingesting,
    Ready,
}

impl fmt::Display for KbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KbState::Uninitialized => "uninitialized",
            KbState::Ingesting => "ingesting",
            KbState::Ready => "ready",
        })
    }
}

/// Held for the duration of one ingestion; a dropped or failed ingestion
/// leaves the state it started from.
struct IngestGuard<'a> {
    state: &'a Mutex<KbState>,
    restore: KbState,
}

impl IngestGuard<'_> {
    fn finish(mut self, state: KbState) {
        self.restore = state;
    }
}

impl Drop for IngestGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = self.restore;
    }
}

pub struct KnowledgeBase {
    config: Config,
    loader: DocumentLoader,
    embedder: Box<dyn EmbeddingProvider>,
    composer: AnswerComposer,
    index: SharedIndex,
    storage: Option<Box<dyn IndexStorage>>,
    state: Mutex<KbState>,
}

impl KnowledgeBase {
    /// Build a knowledge base with an empty index, ignoring anything
    /// already persisted. See [`open`](KnowledgeBase::open).
    pub fn new(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let composer = create_composer(&config.answer, config.retrieval.preview_chars)?;
        let storage = create_storage(&config.index)?;
        Self::with_components(config, embedder, composer, storage)
    }

    /// Build from explicit components; the index starts empty.
    pub fn with_components(
        config: Config,
        embedder: Box<dyn EmbeddingProvider>,
        composer: AnswerComposer,
        storage: Option<Box<dyn IndexStorage>>,
    ) -> Result<Self> {
        let loader = DocumentLoader::new(&config.loader)?;
        let index = VectorIndex::new(embedder.dims(), config.retrieval.similarity_threshold).shared();
        Ok(Self {
            config,
            loader,
            embedder,
            composer,
            index,
            storage,
            state: Mutex::new(KbState::Uninitialized),
        })
    }

    /// Build a knowledge base and load the persisted index, if any.
    pub async fn open(config: Config) -> Result<Self> {
        let kb = Self::new(config)?;

        if let Some(storage) = &kb.storage {
            let snapshot = storage.load().await.with_context(|| {
                format!("Failed to load index from {}", storage.location().display())
            })?;
            if let Some(snapshot) = snapshot {
                let restored = VectorIndex::from_snapshot(
                    snapshot,
                    kb.embedder.dims(),
                    kb.config.retrieval.similarity_threshold,
                )
                .with_context(|| {
                    format!("Stored index at {} is incompatible", storage.location().display())
                })?;

                let count = restored.count();
                *kb.index.write().await = restored;
                if count > 0 {
                    kb.set_state(KbState::Ready);
                }
                tracing::info!(
                    backend = storage.name(),
                    path = %storage.location().display(),
                    entries = count,
                    "loaded index"
                );
            }
        }

        Ok(kb)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> KbState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: KbState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Handle to the shared index.
    pub fn index(&self) -> SharedIndex {
        self.index.clone()
    }

    /// Move to `Ingesting`. The returned guard restores the previous state
    /// when dropped unless [`IngestGuard::finish`] set another one.
    fn begin_ingest(&self) -> Option<IngestGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == KbState::Ingesting {
            return None;
        }
        let previous = *state;
        *state = KbState::Ingesting;
        Some(IngestGuard {
            state: &self.state,
            restore: previous,
        })
    }

    /// Ingest every supported file under `dir`.
    pub async fn ingest(&self, dir: &Path) -> IngestReport {
        let Some(guard) = self.begin_ingest() else {
            tracing::warn!(dir = %dir.display(), "ingestion already in progress");
            return IngestReport::failed("ingestion already in progress");
        };

        let loader = self.loader.clone();
        let root: PathBuf = dir.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load_directory(&root)).await;

        let outcome = match loaded {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(dir = %dir.display(), error = %e, "ingestion failed");
                return IngestReport::failed(e.to_string());
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "loader task failed");
                return IngestReport::failed(format!("loader task failed: {}", e));
            }
        };

        let mut report = IngestReport::success();
        report.files_skipped = outcome.skipped.len();
        report.skipped = outcome
            .skipped
            .iter()
            .map(|s| SkippedSummary {
                path: s
                    .path
                    .strip_prefix(dir)
                    .unwrap_or(&s.path)
                    .to_string_lossy()
                    .replace('\\', "/"),
                reason: s.reason.to_string(),
            })
            .collect();

        for doc in &outcome.documents {
            match self.ingest_document(doc).await {
                Ok(summary) => {
                    report.documents_processed += 1;
                    report.chunks_processed += summary.chunks;
                    report.embeddings_generated += summary.chunks;
                    report.entries_inserted += summary.chunks;
                    report.documents.push(summary);
                }
                Err(e) => {
                    tracing::warn!(document = %doc.id, error = %e, "skipping document");
                    report.warnings.push(format!("{}: {}", doc.id, e));
                }
            }
        }

        if let Err(e) = self.save().await {
            tracing::warn!(error = %e, "failed to persist index");
            report.warnings.push(format!("failed to persist index: {}", e));
        }

        guard.finish(KbState::Ready);
        tracing::info!(
            dir = %dir.display(),
            documents = report.documents_processed,
            chunks = report.chunks_processed,
            skipped = report.files_skipped,
            "ingestion complete"
        );
        report
    }

    /// Chunk, embed and insert one document. Nothing is inserted unless
    /// every chunk was embedded.
    async fn ingest_document(&self, doc: &Document) -> Result<DocumentSummary> {
        let chunks = chunk_document(doc, self.config.chunking.max_chars);
        if chunks.is_empty() {
            anyhow::bail!("no chunks produced");
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("embedding failed")?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let inserted = self
            .index
            .write()
            .await
            .insert(chunks.into_iter().zip(vectors).collect())?;

        tracing::debug!(document = %doc.id, chunks = inserted, "indexed document");
        Ok(DocumentSummary {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            format: doc.format,
            language: doc.language,
            byte_size: doc.byte_size,
            chunks: inserted,
        })
    }

    /// Answer `question` from the top `k` matching chunks.
    pub async fn query(&self, question: &str, language: Language, k: usize) -> Answer {
        let vector = match self.embedder.embed(question).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::error!(error = %e, "failed to embed question");
                return error_answer(question, language);
            }
        };

        let results = self.index.read().await.search(&vector, k);
        tracing::debug!(results = results.len(), k, "retrieved");

        self.composer.compose(question, &results, language).await
    }

    pub async fn stats(&self) -> Stats {
        let index = self.index.read().await;
        let index_size_bytes = match &self.storage {
            Some(storage) => storage.size_bytes().await,
            None => index
                .entries()
                .iter()
                .map(|e| (e.embedding.len() * 4 + e.chunk.text.len()) as u64)
                .sum(),
        };

        Stats {
            state: self.state().to_string(),
            document_count: index.document_count(),
            embedding_count: index.count(),
            index_size_bytes,
            last_updated: index.updated_at(),
            index_backend: self
                .storage
                .as_ref()
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| "memory".to_string()),
            embedding: self.embedder.info(),
            answer_synthesizer: self.composer.synthesizer().describe(),
        }
    }

    /// Persist the current index. A no-op for the `memory` backend.
    pub async fn save(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let snapshot = self.index.read().await.snapshot();
        storage
            .save(&snapshot)
            .await
            .with_context(|| format!("Failed to save index to {}", storage.location().display()))?;
        tracing::info!(
            backend = storage.name(),
            entries = snapshot.entries.len(),
            "index persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use std::fs;
    use tempfile::TempDir;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.index.backend = "memory".to_string();
        config
    }

    fn corpus() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("products.txt"),
            "Our products include LED streetlights of 60W, 90W and 120W.",
        )
        .unwrap();
        tmp
    }

    #[tokio::test]
    async fn starts_uninitialized() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        assert_eq!(kb.state(), KbState::Uninitialized);
        let stats = kb.stats().await;
        assert_eq!(stats.embedding_count, 0);
        assert_eq!(stats.index_backend, "memory");
        assert_eq!(stats.state, "uninitialized");
    }

    #[tokio::test]
    async fn ingest_moves_to_ready() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let dir = corpus();
        let report = kb.ingest(dir.path()).await;
        assert!(report.is_success());
        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.chunks_processed, 1);
        assert_eq!(report.embeddings_generated, 1);
        assert_eq!(report.documents[0].filename, "products.txt");
        assert_eq!(kb.state(), KbState::Ready);
    }

    #[tokio::test]
    async fn failed_ingest_restores_previous_state() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let report = kb.ingest(Path::new("/no/such/corpus")).await;
        assert!(!report.is_success());
        assert!(report.error.unwrap().contains("does not exist"));
        assert_eq!(kb.state(), KbState::Uninitialized);

        let dir = corpus();
        kb.ingest(dir.path()).await;
        kb.ingest(Path::new("/no/such/corpus")).await;
        assert_eq!(kb.state(), KbState::Ready);
        assert_eq!(kb.stats().await.embedding_count, 1);
    }

    #[tokio::test]
    async fn concurrent_ingest_is_rejected() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let guard = kb.begin_ingest().unwrap();
        assert_eq!(guard.restore, KbState::Uninitialized);
        let dir = corpus();
        let report = kb.ingest(dir.path()).await;
        assert!(!report.is_success());
        assert_eq!(kb.state(), KbState::Ingesting);

        drop(guard);
        assert_eq!(kb.state(), KbState::Uninitialized);
    }

    #[tokio::test]
    async fn cancelled_ingest_releases_state() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let dir = corpus();

        tokio::select! {
            biased;
            _ = kb.ingest(dir.path()) => {}
            _ = std::future::ready(()) => {}
        }
        assert_ne!(kb.state(), KbState::Ingesting);

        assert!(kb.ingest(dir.path()).await.is_success());
        assert_eq!(kb.state(), KbState::Ready);
    }

    struct FailingEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }
        fn model_name(&self) -> &str {
            "none"
        }
        fn dims(&self) -> usize {
            8
        }
        fn batch_size(&self) -> Option<usize> {
            None
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::InvalidResponse("unavailable".to_string()))
        }
    }

    fn failing_kb() -> KnowledgeBase {
        let config = memory_config();
        let composer = create_composer(&config.answer, config.retrieval.preview_chars).unwrap();
        KnowledgeBase::with_components(config, Box::new(FailingEmbedder), composer, None).unwrap()
    }

    #[tokio::test]
    async fn query_embed_failure_gives_fallback_answer() {
        let kb = failing_kb();
        let answer = kb.query("Which floodlights do you sell?", Language::En, 5).await;
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(answer.composed_by, "fallback");
        assert!(answer.sources.is_empty());
        assert_eq!(answer.language, Language::En);
    }

    #[tokio::test]
    async fn ingest_embed_failure_becomes_document_warning() {
        let kb = failing_kb();
        let dir = corpus();
        let report = kb.ingest(dir.path()).await;
        assert!(report.is_success());
        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("products.txt"));
        assert_eq!(kb.stats().await.embedding_count, 0);
    }

    #[tokio::test]
    async fn report_lists_skipped_files_with_reasons() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let dir = corpus();
        fs::write(dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let report = kb.ingest(dir.path()).await;
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "logo.png");
        assert_eq!(report.skipped[0].reason, "unsupported extension: .png");
    }

    #[tokio::test]
    async fn query_returns_cited_answer() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let dir = corpus();
        kb.ingest(dir.path()).await;

        let answer = kb.query("What wattages are available?", Language::En, 5).await;
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].title, "products.txt");
        assert!(answer.confidence > 0.0);
    }

    #[tokio::test]
    async fn query_on_empty_index_has_zero_confidence() {
        let kb = KnowledgeBase::new(memory_config()).unwrap();
        let answer = kb.query("anything at all", Language::Ar, 5).await;
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.language, Language::Ar);
    }

    #[tokio::test]
    async fn open_restores_persisted_index() {
        let data = TempDir::new().unwrap();
        let mut config = memory_config();
        config.index.backend = "flat_file".to_string();
        config.index.path = data.path().join("kb.index");

        let dir = corpus();
        {
            let kb = KnowledgeBase::open(config.clone()).await.unwrap();
            assert!(kb.ingest(dir.path()).await.is_success());
        }

        let kb = KnowledgeBase::open(config).await.unwrap();
        assert_eq!(kb.state(), KbState::Ready);
        let stats = kb.stats().await;
        assert_eq!(stats.embedding_count, 1);
        assert_eq!(stats.index_backend, "flat_file");
        assert!(stats.index_size_bytes > 0);
    }

    #[tokio::test]
    async fn open_rejects_index_of_other_dimension() {
        let data = TempDir::new().unwrap();
        let mut config = memory_config();
        config.index.backend = "flat_file".to_string();
        config.index.path = data.path().join("kb.index");

        let dir = corpus();
        let kb = KnowledgeBase::open(config.clone()).await.unwrap();
        kb.ingest(dir.path()).await;

        config.embedding.dims = 128;
        assert!(KnowledgeBase::open(config).await.is_err());
    }

    #[tokio::test]
    async fn persist_failure_is_a_warning() {
        let data = TempDir::new().unwrap();
        // a directory where the index file should be makes the rename fail
        let blocked = data.path().join("kb.index");
        fs::create_dir_all(blocked.join("occupied")).unwrap();

        let mut config = memory_config();
        config.index.backend = "flat_file".to_string();
        config.index.path = blocked;

        let kb = KnowledgeBase::new(config).unwrap();
        let dir = corpus();
        let report = kb.ingest(dir.path()).await;
        assert!(report.is_success());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("failed to persist index"));
    }
}
