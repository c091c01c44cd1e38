//! Storage contracts for the answer engine.
//!
//! Four narrow traits cover everything the pipeline persists:
//!
//! | Trait | Holds | Backends |
//! |-------|-------|----------|
//! | [`VectorIndex`] | embedded child segments | memory, SQLite, Upstash Vector |
//! | [`DocumentStore`] | parent documents | memory, SQLite, filesystem |
//! | [`ListStore`] | append-only lists (chat history) | memory, SQLite, Upstash Redis |
//! | [`KvStore`] | string values (share flags) | memory, SQLite, Upstash Redis |
//!
//! Implementations must be `Send + Sync` and must not hold locks across
//! `.await` points.

pub mod fs;
pub mod memory;
pub mod sqlite;
pub mod upstash;

use async_trait::async_trait;
use futures_util::future::join_all;
use std::future::Future;

use crate::error::EngineResult;
use crate::models::{Document, IndexEntry, IndexHit};

pub use fs::FsDocumentStore;
pub use memory::{MemoryDocumentStore, MemoryKvStore, MemoryListStore, MemoryVectorIndex};
pub use sqlite::{SqliteDocumentStore, SqliteKvStore, SqliteListStore, SqliteVectorIndex};
pub use upstash::{UpstashRedis, UpstashVectorIndex};

/// Similarity index over child segment vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by id.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> EngineResult<()>;

    /// Up to `k` hits, best first. Equal scores keep the backend's own order.
    async fn query(&self, vector: &[f32], k: usize) -> EngineResult<Vec<IndexHit>>;

    /// Remove every entry whose id starts with `prefix`. Returns the count removed
    /// when the backend reports it.
    async fn delete_prefix(&self, prefix: &str) -> EngineResult<usize>;
}

/// Key-value store of parent documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, document: Document) -> EngineResult<()>;

    async fn get(&self, id: &str) -> EngineResult<Option<Document>>;

    /// Concurrent point reads, one result per id, in input order. Each read
    /// is retried once.
    async fn get_many(&self, ids: &[String]) -> Vec<EngineResult<Option<Document>>> {
        join_all(
            ids.iter()
                .map(|id| retry_once("document read", move || self.get(id))),
        )
        .await
    }

    /// Remove `id`. Returns whether it was present.
    async fn delete(&self, id: &str) -> EngineResult<bool>;

    async fn keys(&self) -> EngineResult<Vec<String>>;
}

/// Append-only string lists addressed by key.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Append `values` in order with a single write.
    async fn push(&self, key: &str, values: Vec<String>) -> EngineResult<()>;

    /// Every value under `key` in append order. Missing keys read as empty.
    async fn range(&self, key: &str) -> EngineResult<Vec<String>>;

    /// Sorted keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>>;
}

/// Last-write-wins string values.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> EngineResult<()>;
}

/// Runs an idempotent read, retrying once on failure.
pub async fn retry_once<T, F, Fut>(what: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!("{} failed, retrying once: {}", what, e);
            op().await
        }
    }
}
