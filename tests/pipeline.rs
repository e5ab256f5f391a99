//! End-to-end properties of the ingest/query pipeline, run in-process.

use std::fs;
use tempfile::TempDir;

use knowledge_base::chunk::split_text;
use knowledge_base::compose::confidence;
use knowledge_base::config::Config;
use knowledge_base::embedding::{DeterministicProvider, EmbeddingProvider};
use knowledge_base::index::{cosine_similarity, VectorIndex};
use knowledge_base::knowledge_base::{KbState, KnowledgeBase};
use knowledge_base::models::Language;
use knowledge_base::storage::{IndexStorage, SqliteStorage};

const LED_SENTENCE: &str = "Our products include LED streetlights of 60W, 90W and 120W.";

fn memory_config() -> Config {
    let mut config = Config::default();
    config.index.backend = "memory".to_string();
    config
}

fn led_corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("catalog.txt"), LED_SENTENCE).unwrap();
    tmp
}

fn catalog_text() -> String {
    (1..=30)
        .map(|i| {
            format!(
                "Model SL-{} delivers {} lumens at {}W with an IP66 rated housing.",
                i * 10,
                i * 1300,
                i * 10
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn single_document_scenario_cites_it_once() {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    let corpus = led_corpus();
    assert!(kb.ingest(corpus.path()).await.is_success());

    let answer = kb.query("What wattages are available?", Language::En, 5).await;
    assert!(!answer.answer.is_empty());
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].title, "catalog.txt");
    assert_eq!(answer.sources[0].format, ".txt");
    assert!(answer.confidence > 0.0);
    assert_eq!(answer.language, Language::En);
}

#[tokio::test]
async fn arabic_query_uses_arabic_path() {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    let corpus = led_corpus();
    kb.ingest(corpus.path()).await;

    let answer = kb.query("What wattages are available?", Language::Ar, 5).await;
    assert_eq!(answer.language, Language::Ar);
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn empty_index_answers_with_zero_confidence() {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    for question in ["What wattages are available?", "completely unrelated nonsense", ""] {
        let answer = kb.query(question, Language::En, 5).await;
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.sources.is_empty());
    }
}

#[tokio::test]
async fn nothing_above_threshold_falls_back() {
    let mut config = memory_config();
    config.retrieval.similarity_threshold = 0.99;
    let kb = KnowledgeBase::new(config).unwrap();
    let corpus = led_corpus();
    kb.ingest(corpus.path()).await;

    let answer = kb.query("completely unrelated nonsense", Language::En, 5).await;
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn reingest_doubles_entry_count() {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    let corpus = led_corpus();
    fs::write(corpus.path().join("more.md"), catalog_text()).unwrap();

    let first = kb.ingest(corpus.path()).await;
    let count = kb.stats().await.embedding_count;
    assert_eq!(count, first.entries_inserted);

    kb.ingest(corpus.path()).await;
    assert_eq!(kb.stats().await.embedding_count, count * 2);
    assert_eq!(kb.state(), KbState::Ready);
}

#[tokio::test]
async fn every_entry_has_configured_dimension() {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    let corpus = led_corpus();
    fs::write(corpus.path().join("more.md"), catalog_text()).unwrap();
    kb.ingest(corpus.path()).await;

    let index = kb.index();
    let index = index.read().await;
    assert!(index.count() > 2);
    assert!(index.entries().iter().all(|e| e.embedding.len() == 1536));
}

#[tokio::test]
async fn deterministic_embeddings_are_stable_across_instances() {
    let a = DeterministicProvider::new(1536);
    let b = DeterministicProvider::new(1536);
    let va = a.embed(LED_SENTENCE).await.unwrap();
    let vb = b.embed(LED_SENTENCE).await.unwrap();
    assert_eq!(va, vb);
    assert!((cosine_similarity(&va, &vb) - 1.0).abs() < 1e-6);
    assert_eq!(cosine_similarity(&va, &vec![0.0; 1536]), 0.0);
}

#[tokio::test]
async fn search_results_are_ordered_bounded_and_above_threshold() {
    let provider = DeterministicProvider::new(64);
    let texts: Vec<String> = (0..40).map(|i| format!("fixture sentence {}", i)).collect();
    let vectors = provider.embed_batch(&texts).await.unwrap();

    let mut index = VectorIndex::new(64, 0.72);
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(i, t)| knowledge_base::models::Chunk {
            id: format!("c{}", i),
            document_id: format!("doc{}", i % 4),
            filename: format!("doc{}.txt", i % 4),
            format: knowledge_base::models::FileFormat::Text,
            language: Language::En,
            chunk_index: i,
            total_chunks: 40,
            text: t.clone(),
            hash: knowledge_base::chunk::content_hash(t),
        });
    index.insert(chunks.zip(vectors).collect()).unwrap();

    for q in ["first probe", "second probe", "third probe"] {
        let query = provider.embed(q).await.unwrap();
        for k in [0, 1, 3, 10, 100] {
            let results = index.search(&query, k);
            assert!(results.len() <= k);
            assert!(results.iter().all(|r| r.score >= 0.72));
            assert!(results.iter().all(|r| (-1.0..=1.0).contains(&r.score)));
            assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}

#[test]
fn confidence_rewards_more_sources_but_never_exceeds_one() {
    for avg in [0.7f32, 0.75, 0.8, 0.9, 0.99] {
        let one = confidence(&[avg]);
        let three = confidence(&[avg, avg, avg]);
        assert!(three >= one);
        assert!(three <= 1.0);
    }
}

#[test]
fn chunks_reconstruct_document_text() {
    let text = catalog_text();
    let chunks = split_text(&text, 200);
    assert!(chunks.len() > 1);
    let rebuilt = chunks.join(" ");
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(normalize(&rebuilt), normalize(&text));
}

async fn assert_equivalent(a: &VectorIndex, b: &VectorIndex) {
    assert_eq!(a.count(), b.count());
    let provider = DeterministicProvider::new(a.dims());
    for q in ["wattage", "warranty", "ما الضمان؟"] {
        let query = provider.embed(q).await.unwrap();
        let ra: Vec<_> = a.search(&query, 10).into_iter().map(|r| (r.chunk.id, r.score)).collect();
        let rb: Vec<_> = b.search(&query, 10).into_iter().map(|r| (r.chunk.id, r.score)).collect();
        assert_eq!(ra, rb);
    }
}

async fn ingested_index() -> VectorIndex {
    let kb = KnowledgeBase::new(memory_config()).unwrap();
    let corpus = led_corpus();
    fs::write(corpus.path().join("more.md"), catalog_text()).unwrap();
    kb.ingest(corpus.path()).await;
    let shared = kb.index();
    let index = shared.read().await.clone();
    index
}

#[tokio::test]
async fn flat_file_round_trip_preserves_search() {
    let original = ingested_index().await;
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.index");

    original.save(&path).await.unwrap();
    let loaded = VectorIndex::load(&path, 1536, original.similarity_threshold())
        .await
        .unwrap();
    assert_equivalent(&original, &loaded).await;
}

#[tokio::test]
async fn sqlite_round_trip_preserves_search() {
    let original = ingested_index().await;
    let tmp = TempDir::new().unwrap();
    let storage = SqliteStorage::new(tmp.path().join("kb.sqlite"));

    storage.save(&original.snapshot()).await.unwrap();
    let snapshot = storage.load().await.unwrap().unwrap();
    let loaded =
        VectorIndex::from_snapshot(snapshot, 1536, original.similarity_threshold()).unwrap();
    assert_equivalent(&original, &loaded).await;
}

#[tokio::test]
async fn open_with_sqlite_backend_restores_state() {
    let data = TempDir::new().unwrap();
    let mut config = memory_config();
    config.index.backend = "sqlite".to_string();
    config.index.path = data.path().join("kb.sqlite");

    let corpus = led_corpus();
    {
        let kb = KnowledgeBase::open(config.clone()).await.unwrap();
        kb.ingest(corpus.path()).await;
    }

    let kb = KnowledgeBase::open(config).await.unwrap();
    assert_eq!(kb.state(), KbState::Ready);
    let answer = kb.query("What wattages are available?", Language::En, 5).await;
    assert_eq!(answer.sources.len(), 1);
    assert!(data.path().join("kb.sqlite").exists());
}
