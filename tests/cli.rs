use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hae_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hae"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus = root.join("corpus");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(
        corpus.join("rita.txt"),
        "[00:00:03] Rita was born in Kraków in 1931.\n\n[00:00:09] Her father owned a bakery.",
    )
    .unwrap();
    fs::write(
        corpus.join("trains.txt"),
        "The trains left the station at dawn. Nobody told us where we were going.",
    )
    .unwrap();
    fs::write(corpus.join("notes.md"), "Not a transcript.").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/hae.sqlite"

[storage]
vector = "sqlite"
documents = "sqlite"
history = "sqlite"

[embedding]
provider = "hash"
model = "hash"
dims = 256

[ingest]
root = "{root}/corpus"
include_globs = ["**/*.txt"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("hae.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hae(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hae_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hae binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_hae(&config, &["ingest", "--dry-run"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents found: 2"));
    assert!(stdout.contains("estimated parents: 2"));
}

#[test]
fn test_ingest_with_limit() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_hae(&config, &["ingest", "--dry-run", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("documents found: 1"));
}

#[test]
fn test_ingest_then_retrieve() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_hae(&config, &["ingest"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("documents: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, stderr, success) = run_hae(&config, &["retrieve", "Where was Rita born", "--k", "1"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.starts_with("1. "));
    assert!(stdout.contains("source: rita.txt"));
    assert!(stdout.contains("Kraków"));
    assert!(!stdout.contains("[00:00:03]"));
}

#[test]
fn test_ingest_idempotent() {
    let (_tmp, config) = setup_test_env();
    assert!(run_hae(&config, &["ingest"]).2);
    assert!(run_hae(&config, &["ingest"]).2);

    let (stdout, _, success) = run_hae(&config, &["retrieve", "trains station dawn", "--k", "10"]);
    assert!(success);
    assert_eq!(stdout.matches("source: trains.txt").count(), 1);
}

#[test]
fn test_retrieve_empty_query() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_hae(&config, &["retrieve", "  "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_history_empty() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_hae(&config, &["history", "--user", "u1"]);
    assert!(success);
    assert!(stdout.contains("0 conversation(s)"));

    let (_, stderr, success) = run_hae(&config, &["history", "--user", "u/1"]);
    assert!(!success);
    assert!(stderr.contains("invalid identifier"));
}

#[test]
fn test_ask_requires_chat_model() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_hae(
        &config,
        &["ask", "Where was Rita born?", "--user", "u1", "--conversation", "c1"],
    );
    assert!(!success);
    assert!(stderr.contains("model error"));
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_hae(Path::new("/nonexistent/hae.toml"), &["history", "--user", "u1"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
