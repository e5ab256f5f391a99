use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

fn setup_test_env(backend: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("streetlights.txt"),
        "Our products include LED streetlights of 60W, 90W and 120W. All models carry a five year warranty.",
    )
    .unwrap();
    fs::write(
        files_dir.join("floodlights.md"),
        "# Floodlights\n\nThe FL series covers 200W to 400W for stadiums and ports.",
    )
    .unwrap();
    fs::write(
        files_dir.join("faq_ar.txt"),
        "منتجاتنا تشمل أعمدة إنارة الشوارع بقدرة ستين واط وتسعين واط. الضمان خمس سنوات.",
    )
    .unwrap();
    fs::write(files_dir.join("logo.png"), [0x89u8, b'P', b'N', b'G']).unwrap();

    let index_file = match backend {
        "sqlite" => "kb.sqlite",
        _ => "kb.index",
    };
    let config_content = format!(
        r#"[index]
backend = "{}"
path = "{}/data/{}"

[chunking]
max_chars = 1000

[retrieval]
similarity_threshold = 0.7
max_results = 5

[logging]
level = "warn"
"#,
        backend,
        root.display(),
        index_file
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .display()
        .to_string()
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, stdout))
}

#[test]
fn test_ingest_reports_counts() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);

    let (stdout, stderr, success) = run_kb(&config_path, &["ingest", &dir]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents processed: 3"), "{}", stdout);
    assert!(stdout.contains("chunks processed: 3"));
    assert!(stdout.contains("embeddings generated: 3"));
    assert!(stdout.contains("files skipped: 1"));
    assert!(stdout.contains("skipped logo.png: unsupported extension: .png"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_json_report() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);

    let (stdout, _, success) = run_kb(&config_path, &["ingest", &dir, "--json"]);
    assert!(success);
    let report = json(&stdout);
    assert_eq!(report["status"], "success");
    assert_eq!(report["documents_processed"], 3);
    assert!(report["error"].is_null());

    let languages: Vec<&str> = report["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["language"].as_str().unwrap())
        .collect();
    assert!(languages.contains(&"ar"));
    assert!(languages.contains(&"en"));

    assert_eq!(report["files_skipped"], 1);
    let skipped = report["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["path"], "logo.png");
    assert_eq!(skipped[0]["reason"], "unsupported extension: .png");
}

#[test]
fn test_ingest_missing_directory_fails() {
    let (tmp, config_path) = setup_test_env("flat_file");
    let missing = tmp.path().join("nope").display().to_string();

    let (stdout, stderr, success) = run_kb(&config_path, &["ingest", &missing, "--json"]);
    assert!(!success, "ingest of a missing directory should fail");
    let report = json(&stdout);
    assert_eq!(report["status"], "error");
    assert!(report["error"].as_str().unwrap().contains("does not exist"));
    assert!(stderr.contains("ingestion failed"));

    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let stats = json(&stdout);
    assert_eq!(stats["state"], "uninitialized");
    assert_eq!(stats["embedding_count"], 0);
}

#[test]
fn test_query_after_ingest_uses_persisted_index() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);
    run_kb(&config_path, &["ingest", &dir]);

    let (stdout, stderr, success) = run_kb(
        &config_path,
        &["query", "What wattages are available?", "--json"],
    );
    assert!(success, "query failed: stderr={}", stderr);
    let answer = json(&stdout);
    assert_eq!(answer["language"], "en");
    assert_eq!(answer["question"], "What wattages are available?");
    assert!(answer["confidence"].as_f64().unwrap() > 0.0);
    let sources = answer["sources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert!(sources.len() <= 5);
    assert!(sources
        .iter()
        .all(|s| s["score"].as_f64().unwrap() >= 0.7 - 1e-6));
}

#[test]
fn test_query_limit_bounds_sources() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);
    run_kb(&config_path, &["ingest", &dir]);

    let (stdout, _, success) = run_kb(
        &config_path,
        &["query", "Warranty?", "--limit", "1", "--json"],
    );
    assert!(success);
    let answer = json(&stdout);
    assert_eq!(answer["sources"].as_array().unwrap().len(), 1);
}

#[test]
fn test_query_arabic_language_tag() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);
    run_kb(&config_path, &["ingest", &dir]);

    let (stdout, _, success) = run_kb(
        &config_path,
        &["query", "What wattages are available?", "--lang", "ar", "--json"],
    );
    assert!(success);
    assert_eq!(json(&stdout)["language"], "ar");

    let (stdout, _, success) = run_kb(
        &config_path,
        &["query", "ما هي القدرات المتوفرة؟", "--lang", "auto", "--json"],
    );
    assert!(success);
    assert_eq!(json(&stdout)["language"], "ar");
}

#[test]
fn test_query_unknown_language_is_rejected() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let (_, stderr, success) = run_kb(&config_path, &["query", "Bonjour?", "--lang", "fr"]);
    assert!(!success);
    assert!(stderr.contains("unknown language"));
}

#[test]
fn test_query_empty_index_has_zero_confidence() {
    let (_tmp, config_path) = setup_test_env("flat_file");

    let (stdout, _, success) = run_kb(
        &config_path,
        &["query", "completely unrelated nonsense", "--json"],
    );
    assert!(success);
    let answer = json(&stdout);
    assert_eq!(answer["confidence"].as_f64().unwrap(), 0.0);
    assert!(answer["sources"].as_array().unwrap().is_empty());
}

#[test]
fn test_query_text_output() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);
    run_kb(&config_path, &["ingest", &dir]);

    let (stdout, _, success) = run_kb(&config_path, &["query", "Floodlight wattage?"]);
    assert!(success);
    assert!(stdout.contains("Question: Floodlight wattage?"));
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("Confidence:"));
}

#[test]
fn test_reingest_doubles_entries() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);

    run_kb(&config_path, &["ingest", &dir]);
    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let first = json(&stdout)["embedding_count"].as_u64().unwrap();
    assert_eq!(first, 3);

    run_kb(&config_path, &["ingest", &dir]);
    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let stats = json(&stdout);
    assert_eq!(stats["embedding_count"].as_u64().unwrap(), first * 2);
    assert_eq!(stats["document_count"], 3);
}

#[test]
fn test_stats_text_output() {
    let (_tmp, config_path) = setup_test_env("flat_file");
    let dir = files_dir(&config_path);
    run_kb(&config_path, &["ingest", &dir]);

    let (stdout, stderr, success) = run_kb(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("State:       ready"));
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("Embeddings:  3"));
    assert!(stdout.contains("deterministic"));
}

#[test]
fn test_sqlite_backend_persists_between_runs() {
    let (tmp, config_path) = setup_test_env("sqlite");
    let dir = files_dir(&config_path);

    let (stdout, stderr, success) = run_kb(&config_path, &["ingest", &dir]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(tmp.path().join("data/kb.sqlite").exists());

    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let stats = json(&stdout);
    assert_eq!(stats["index_backend"], "sqlite");
    assert_eq!(stats["embedding_count"], 3);
    assert!(stats["index_size_bytes"].as_u64().unwrap() > 0);
}

#[test]
fn test_invalid_config_is_reported() {
    let (tmp, _) = setup_test_env("flat_file");
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[embedding]\nprovider = \"faiss\"\n").unwrap();

    let (_, stderr, success) = run_kb(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}
