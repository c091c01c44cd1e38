//! Corpus ingestion: scan, clean, and index a directory of transcripts.
//!
//! Each file matched by `ingest.include_globs` under `ingest.root` becomes one
//! source document. `.git`, `target`, and `node_modules` are always excluded.
//! Files are processed in relative-path order, so runs are deterministic.
//!
//! Cleaning removes `[hh:mm:ss]` timestamp markers and collapses whitespace
//! runs to a single space. A document's id is the SHA-256 hex digest of its
//! relative path, so re-ingesting a file replaces its earlier segments.

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::config::{Config, IngestConfig};
use crate::context::AppContext;
use crate::models::SourceDocument;

/// A corpus file found by [`scan_corpus`].
#[derive(Debug, Clone)]
pub struct CorpusFile {
    pub path: PathBuf,
    pub relative_path: String,
}

pub fn scan_corpus(config: &IngestConfig) -> Result<Vec<CorpusFile>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative_path = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&relative_path) || !include_set.is_match(&relative_path) {
            continue;
        }
        files.push(CorpusFile {
            path: path.to_path_buf(),
            relative_path,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Transcript text normalisation.
pub struct Cleaner {
    timestamps: Option<Regex>,
    collapse_whitespace: bool,
}

impl Cleaner {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let timestamps = if config.strip_timestamps {
            Some(Regex::new(r"\[\d{1,2}:\d{2}:\d{2}\]")?)
        } else {
            None
        };
        Ok(Self {
            timestamps,
            collapse_whitespace: config.collapse_whitespace,
        })
    }

    pub fn clean(&self, text: &str) -> String {
        let text = match &self.timestamps {
            Some(re) => re.replace_all(text, " ").into_owned(),
            None => text.to_string(),
        };
        if self.collapse_whitespace {
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            text.trim().to_string()
        }
    }
}

pub fn document_id(relative_path: &str) -> String {
    hex::encode(Sha256::digest(relative_path.as_bytes()))
}

/// Documents ready for indexing, plus what was left out.
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub documents: Vec<SourceDocument>,
    pub skipped_empty: usize,
    pub skipped_oversize: usize,
}

/// Reads and cleans up to `limit` corpus files.
pub fn load_corpus(config: &IngestConfig, limit: Option<usize>) -> Result<LoadedCorpus> {
    let cleaner = Cleaner::new(config)?;
    let mut files = scan_corpus(config)?;
    if let Some(limit) = limit {
        files.truncate(limit);
    }

    let ingested_at = Utc::now().to_rfc3339();
    let mut corpus = LoadedCorpus::default();
    for file in files {
        let raw = std::fs::read(&file.path)?;
        let text = cleaner.clean(&String::from_utf8_lossy(&raw));
        if text.is_empty() {
            corpus.skipped_empty += 1;
            continue;
        }
        if let Some(max) = config.max_chars {
            if text.chars().count() > max {
                tracing::warn!(source = %file.relative_path, max, "skipping oversize document");
                corpus.skipped_oversize += 1;
                continue;
            }
        }

        let title = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        corpus.documents.push(
            SourceDocument::new(text)
                .with_id(document_id(&file.relative_path))
                .with_metadata("source", file.relative_path.clone())
                .with_metadata("title", title)
                .with_metadata("ingested_at", ingested_at.clone()),
        );
    }
    Ok(corpus)
}

/// `hae ingest`: index the configured corpus and print a summary.
pub async fn run_ingest(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let corpus = load_corpus(&config.ingest, limit)?;

    if dry_run {
        let chunker = Chunker::from_config(&config.chunking)?;
        let mut parents = 0usize;
        let mut children = 0usize;
        for doc in &corpus.documents {
            let id = doc.id.as_deref().unwrap_or("tmp");
            for (text, _) in chunker.split_parent(id, &doc.text) {
                parents += 1;
                children += chunker.split_child(&text).len();
            }
        }
        println!("ingest {} (dry-run)", config.ingest.root.display());
        println!("  documents found: {}", corpus.documents.len());
        println!("  skipped (empty): {}", corpus.skipped_empty);
        println!("  skipped (oversize): {}", corpus.skipped_oversize);
        println!("  estimated parents: {}", parents);
        println!("  estimated children: {}", children);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled; set [embedding] provider to index documents");
    }

    let ctx = AppContext::from_config(config.clone()).await?;
    let report = ctx.retriever.add_documents(corpus.documents).await;
    tracing::info!(
        documents = report.documents,
        children = report.children_indexed,
        failures = report.failures.len(),
        "ingest finished"
    );

    println!("ingest {}", config.ingest.root.display());
    println!("  documents: {}", report.documents);
    println!("  skipped (empty): {}", corpus.skipped_empty);
    println!("  skipped (oversize): {}", corpus.skipped_oversize);
    println!("  parents stored: {}", report.parents_stored);
    println!("  children indexed: {}", report.children_indexed);
    println!("  children dropped: {}", report.children_dropped);
    println!("  stale parents removed: {}", report.parents_removed);
    for failure in &report.failures {
        println!(
            "  failed: {} {} ({})",
            failure.document_id,
            failure.parent_id.as_deref().unwrap_or("-"),
            failure.error
        );
    }
    if report.is_clean() {
        println!("ok");
        Ok(())
    } else {
        bail!("{} ingest failure(s)", report.failures.len())
    }
}
