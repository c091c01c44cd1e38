//! Parent/child retrieval.
//!
//! Ingestion fans each source document out into large *parents* (kept whole
//! in the [`DocumentStore`]) and small *children* (embedded into the
//! [`VectorIndex`] with a `parent_id` back-reference). Queries fan back in:
//! the best-matching children select which parents are returned.
//!
//! ```text
//! SourceDocument ─► split_parent ─► DocumentStore.put(parent)
//!                                   └─► split_child ─► embed ─► VectorIndex.upsert
//!
//! query ─► embed ─► VectorIndex.query(k) ─► distinct parent_ids ─► get_many
//! ```
//!
//! A parent is always written before any of its children reach the index,
//! so every indexed `parent_id` refers to a stored document.
//!
//! Re-adding a document id replaces its earlier generation. Parents are keyed
//! `{document_id}-{n}`; when the new split is shorter, the surplus parents and
//! their children are removed, children first.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunk::{child_id, child_prefix, parent_id, Chunker};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ChildSegment, Document, IndexEntry, SourceDocument, DOCUMENT_ID_KEY, PARENT_ID_KEY,
};
use crate::embedding::Embedder;
use crate::store::{retry_once, DocumentStore, VectorIndex};

/// A per-document or per-batch failure recorded during ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub document_id: String,
    pub parent_id: Option<String>,
    pub error: String,
}

/// Outcome of [`ParentChildRetriever::add_documents`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub parents_stored: usize,
    pub children_indexed: usize,
    pub children_dropped: usize,
    /// Parents left over from a longer earlier version of a document.
    pub parents_removed: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, document_id: &str, parent_id: Option<&str>, error: &EngineError) {
        warn!(
            document_id,
            parent_id = parent_id.unwrap_or("-"),
            "ingest failure: {}",
            error
        );
        self.failures.push(IngestFailure {
            document_id: document_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            error: error.to_string(),
        });
    }
}

pub struct ParentChildRetriever {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl ParentChildRetriever {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            documents,
            batch_size: batch_size.max(1),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Split, store, embed, and index a batch of documents.
    ///
    /// Failures never abort the batch. A parent that cannot be stored stops
    /// the rest of its document; an embedding batch that fails drops only its
    /// own children. Everything is recorded in the returned report.
    pub async fn add_documents(&self, documents: Vec<SourceDocument>) -> IngestReport {
        let mut report = IngestReport::default();

        for source in documents {
            report.documents += 1;
            let document_id = source
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            self.add_document(&document_id, &source, &mut report).await;
        }

        report
    }

    async fn add_document(&self, document_id: &str, source: &SourceDocument, report: &mut IngestReport) {
        let mut children: Vec<ChildSegment> = Vec::new();
        let mut parents = 0;
        let mut complete = true;

        for (text, parent_id) in self.chunker.split_parent(document_id, &source.text) {
            let mut metadata = source.metadata.clone();
            metadata.insert(DOCUMENT_ID_KEY.to_string(), document_id.to_string());

            let parent = Document {
                id: parent_id.clone(),
                text,
                metadata: metadata.clone(),
            };
            let child_texts = self.chunker.split_child(&parent.text);

            if let Err(e) = self.documents.put(parent).await {
                report.fail(document_id, Some(&parent_id), &e);
                complete = false;
                break;
            }
            parents += 1;
            report.parents_stored += 1;

            if let Err(e) = self.index.delete_prefix(&child_prefix(&parent_id)).await {
                report.fail(document_id, Some(&parent_id), &e);
                continue;
            }

            metadata.insert(PARENT_ID_KEY.to_string(), parent_id.clone());
            for (j, text) in child_texts.into_iter().enumerate() {
                if text.trim().is_empty() {
                    continue;
                }
                children.push(ChildSegment {
                    id: child_id(&parent_id, j),
                    text,
                    parent_id: parent_id.clone(),
                    metadata: metadata.clone(),
                });
            }
        }

        for batch in children.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.embedder.embed(&texts).await {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    let e = EngineError::Embedding(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        v.len()
                    ));
                    report.fail(document_id, Some(&batch[0].parent_id), &e);
                    report.children_dropped += batch.len();
                    continue;
                }
                Err(e) => {
                    report.fail(document_id, Some(&batch[0].parent_id), &e);
                    report.children_dropped += batch.len();
                    continue;
                }
            };

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|(child, vector)| IndexEntry {
                    id: child.id.clone(),
                    vector,
                    metadata: child.metadata.clone(),
                })
                .collect();

            match self.index.upsert(entries).await {
                Ok(()) => report.children_indexed += batch.len(),
                Err(e) => {
                    report.fail(document_id, Some(&batch[0].parent_id), &e);
                    report.children_dropped += batch.len();
                }
            }
        }

        if complete {
            self.remove_stale_parents(document_id, parents, report).await;
        }

        debug!(document_id, "indexed document");
    }

    /// Deletes `{document_id}-{from}`, `{document_id}-{from + 1}`, ... until
    /// one is missing. Exact keys only, so `{document_id}-x` ids are untouched.
    async fn remove_stale_parents(&self, document_id: &str, from: usize, report: &mut IngestReport) {
        for index in from.. {
            let stale = parent_id(document_id, index);
            match self.documents.get(&stale).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    report.fail(document_id, Some(&stale), &e);
                    break;
                }
            }
            if let Err(e) = self.index.delete_prefix(&child_prefix(&stale)).await {
                report.fail(document_id, Some(&stale), &e);
                break;
            }
            if let Err(e) = self.documents.delete(&stale).await {
                report.fail(document_id, Some(&stale), &e);
                break;
            }
            report.parents_removed += 1;
        }
    }

    /// Up to `k` parent documents for `query`, best first.
    ///
    /// Parents missing from the store (or unreadable after one retry) are
    /// omitted, so the result may be shorter than `k`.
    pub async fn retrieve(&self, query: &str, k: usize) -> EngineResult<Vec<Document>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        let hits = retry_once("vector query", || self.index.query(&vector, k))
            .await
            .map_err(|e| match e {
                EngineError::Storage(_) => e,
                other => EngineError::Storage(other.to_string()),
            })?;

        let mut seen = HashSet::new();
        let parent_ids: Vec<String> = hits
            .iter()
            .filter_map(|hit| hit.parent_id())
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect();

        let fetched = self.documents.get_many(&parent_ids).await;

        let mut parents = Vec::with_capacity(parent_ids.len());
        for (id, result) in parent_ids.iter().zip(fetched) {
            match result {
                Ok(Some(doc)) => parents.push(doc),
                Ok(None) => warn!(parent_id = %id, "indexed parent missing from document store"),
                Err(e) => warn!(parent_id = %id, "parent fetch failed: {}", e),
            }
        }

        Ok(parents)
    }
}
