//! SQLite-backed store implementations.
//!
//! All four stores share one [`SqlitePool`] and the schema created by
//! [`crate::migrate::run_migrations`]. Vector search loads the namespace's
//! vectors and ranks them by brute-force cosine similarity, ordered by
//! `rowid` first so equal scores keep insertion order.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::EngineResult;
use crate::models::{Document, IndexEntry, IndexHit, Metadata};

use super::{DocumentStore, KvStore, ListStore, VectorIndex};

/// Escapes `%`, `_` and `\` so `prefix` matches literally in a `LIKE ... ESCAPE '\'`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn parse_metadata(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO index_entries (namespace, id, vector, metadata_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    vector = excluded.vector,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&self.namespace)
            .bind(&entry.id)
            .bind(vec_to_blob(&entry.vector))
            .bind(serde_json::to_string(&entry.metadata)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> EngineResult<Vec<IndexHit>> {
        let rows = sqlx::query(
            "SELECT id, vector, metadata_json FROM index_entries WHERE namespace = ? ORDER BY rowid",
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let metadata_json: String = row.get("metadata_json");
                IndexHit {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    metadata: parse_metadata(&metadata_json),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_prefix(&self, prefix: &str) -> EngineResult<usize> {
        let result =
            sqlx::query("DELETE FROM index_entries WHERE namespace = ? AND id LIKE ? ESCAPE '\\'")
                .bind(&self.namespace)
                .bind(like_prefix(prefix))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }
}

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn put(&self, document: Document) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parent_documents (id, text, metadata_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.text)
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<Document>> {
        let row = sqlx::query("SELECT id, text, metadata_json FROM parent_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let metadata_json: String = row.get("metadata_json");
            Document {
                id: row.get("id"),
                text: row.get("text"),
                metadata: parse_metadata(&metadata_json),
            }
        }))
    }

    async fn delete(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM parent_documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT id FROM parent_documents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }
}

pub struct SqliteListStore {
    pool: SqlitePool,
}

impl SqliteListStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListStore for SqliteListStore {
    async fn push(&self, key: &str, values: Vec<String>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for value in values {
            sqlx::query("INSERT INTO list_entries (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn range(&self, key: &str) -> EngineResult<Vec<String>> {
        let values: Vec<String> = sqlx::query_scalar("SELECT value FROM list_entries WHERE key = ? ORDER BY seq")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT key FROM list_entries WHERE key LIKE ? ESCAPE '\\' ORDER BY key",
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
