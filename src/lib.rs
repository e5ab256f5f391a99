//! # Knowledge Base
//!
//! A retrieval-augmented question-answering pipeline over a local document
//! corpus: product catalogs, specification sheets and FAQs in English or
//! Arabic.
//!
//! Documents are loaded from a directory, split into sentence-aligned
//! chunks, embedded, and stored in an in-memory vector index that is
//! persisted to disk. Questions are embedded the same way, matched by
//! cosine similarity, and answered from the best chunks with cited sources
//! and a confidence score.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedding │──▶│ Vector Index │──▶ storage
//! │ txt/pdf/ │   │         │   │ provider  │   │ cosine, top-k│   (file/SQLite)
//! │ docx/... │   └─────────┘   └─────┬─────┘   └──────┬───────┘
//! └──────────┘                       │ question       │ results
//!                                    └───────▶────────┤
//!                                                     ▼
//!                                              ┌─────────────┐
//!                                              │  Composer   │──▶ Answer
//!                                              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb ingest ./corpus
//! kb query "What wattages are available?"
//! kb query "ما هي القدرات المتوفرة؟" --lang auto --json
//! kb stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-format text extraction |
//! | [`loader`] | Directory walking and document tagging |
//! | [`chunk`] | Sentence chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and cosine similarity |
//! | [`storage`] | Index persistence backends |
//! | [`compose`] | Answer composition |
//! | [`knowledge_base`] | Ingest/query orchestration |
//! | [`stats`] | Stats rendering |

pub mod chunk;
pub mod compose;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod knowledge_base;
pub mod loader;
pub mod models;
pub mod stats;
pub mod storage;
