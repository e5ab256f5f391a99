//! # Knowledge Base CLI (`kb`)
//!
//! Ingest a document directory and ask questions against it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb ingest <dir>` | Load, chunk, embed and index a directory |
//! | `kb query "<question>"` | Answer a question from the index |
//! | `kb stats` | Show index statistics |
//! | `kb chat` | Interactive question loop on stdin |
//!
//! ## Examples
//!
//! ```bash
//! kb --config ./config/kb.toml ingest ./corpus
//! kb query "What wattages are available?" --limit 3
//! kb query "ما هي مدة الضمان؟" --lang ar --json
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides `[logging] level`.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use knowledge_base::config::{self, Config};
use knowledge_base::knowledge_base::KnowledgeBase;
use knowledge_base::models::{Answer, IngestReport, Language};
use knowledge_base::stats::render_stats;

/// Knowledge base CLI: retrieval-augmented answers over a document folder.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge base: ingest documents and answer questions with cited sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Without this flag built-in defaults are used: deterministic
    /// embeddings, template answers, flat-file index at `./data/kb.index`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every supported file under a directory.
    ///
    /// Recognized formats: .txt .md .pdf .docx .csv .json. The index is
    /// saved afterwards. Re-ingesting the same directory appends duplicate
    /// entries.
    Ingest {
        /// Directory to ingest.
        dir: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the indexed documents.
    Query {
        /// The question.
        question: String,

        /// Answer language: `en`, `ar`, or `auto` (detect from the question).
        /// Defaults to `[answer] default_language`.
        #[arg(long)]
        lang: Option<String>,

        /// Maximum number of chunks to retrieve.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions interactively. `stats` shows statistics, `quit` exits.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    init_logging(&cfg);

    let kb = KnowledgeBase::open(cfg).await?;

    match cli.command {
        Commands::Ingest { dir, json } => run_ingest(&kb, &dir, json).await?,
        Commands::Query {
            question,
            lang,
            limit,
            json,
        } => {
            let language = resolve_language(lang.as_deref(), &question, kb.config())?;
            let k = limit.unwrap_or(kb.config().retrieval.max_results);
            let answer = kb.query(&question, language, k).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Stats { json } => {
            let stats = kb.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", render_stats(&stats, index_location(kb.config()).as_deref()));
            }
        }
        Commands::Chat => run_chat(&kb).await?,
    }

    Ok(())
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn index_location(cfg: &Config) -> Option<String> {
    match cfg.index.backend.as_str() {
        "memory" => None,
        _ => Some(cfg.index.path.display().to_string()),
    }
}

/// `auto` detects the question's script; absent falls back to config.
fn resolve_language(lang: Option<&str>, question: &str, cfg: &Config) -> Result<Language> {
    match lang {
        None => Ok(cfg.answer.default_language),
        Some("auto") => Ok(Language::detect(question)),
        Some(code) => code.parse::<Language>().map_err(anyhow::Error::msg),
    }
}

async fn run_ingest(kb: &KnowledgeBase, dir: &Path, json: bool) -> Result<()> {
    let report = kb.ingest(dir).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(dir, &report);
    }

    if let Some(error) = report.error {
        bail!("ingestion failed: {}", error);
    }
    Ok(())
}

fn print_report(dir: &Path, report: &IngestReport) {
    println!("ingest {}", dir.display());
    println!("  documents processed: {}", report.documents_processed);
    println!("  chunks processed: {}", report.chunks_processed);
    println!("  embeddings generated: {}", report.embeddings_generated);
    println!("  entries inserted: {}", report.entries_inserted);
    println!("  files skipped: {}", report.files_skipped);
    for doc in &report.documents {
        println!(
            "    {} ({}, {}, {} chunk{})",
            doc.id,
            doc.format,
            doc.language,
            doc.chunks,
            if doc.chunks == 1 { "" } else { "s" }
        );
    }
    for skipped in &report.skipped {
        println!("    skipped {}: {}", skipped.path, skipped.reason);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if report.is_success() {
        println!("ok");
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    println!();
    if !answer.sources.is_empty() {
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "  {}. {} ({}, {})  score {:.3}",
                i + 1,
                source.title,
                source.format,
                source.language,
                source.score
            );
        }
    }
    println!(
        "Confidence: {:.2}  [{}, {}]",
        answer.confidence, answer.language, answer.composed_by
    );
}

async fn run_chat(kb: &KnowledgeBase) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let k = kb.config().retrieval.max_results;

    println!("Ask a question (\"stats\" for statistics, \"quit\" to exit).");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "quit" | "exit" => break,
            "stats" => {
                let stats = kb.stats().await;
                print!("{}", render_stats(&stats, index_location(kb.config()).as_deref()));
            }
            _ => {
                let language = Language::detect(question);
                let answer = kb.query(question, language, k).await;
                print_answer(&answer);
            }
        }
        println!();
    }
    Ok(())
}
