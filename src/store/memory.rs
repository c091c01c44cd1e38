//! In-memory store implementations for tests and ephemeral runs.
//!
//! Uses `HashMap`, `BTreeMap` and `Vec` behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over all stored vectors.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::EngineResult;
use crate::models::{Document, IndexEntry, IndexHit};

use super::{DocumentStore, KvStore, ListStore, VectorIndex};

// Poisoned guards are recovered: every write here is a single insert or retain.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Vector index over a `Vec`, so ties resolve by insertion order.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        read(&self.entries).iter().map(|e| e.id.clone()).collect()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> EngineResult<()> {
        let mut stored = write(&self.entries);
        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => stored.push(entry),
            }
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> EngineResult<Vec<IndexHit>> {
        let stored = read(&self.entries);
        let mut scored: Vec<(f32, &IndexEntry)> = stored
            .iter()
            .map(|e| (cosine_similarity(vector, &e.vector), e))
            .collect();
        // sort_by is stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, e)| IndexHit {
                id: e.id.clone(),
                score,
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> EngineResult<usize> {
        let mut stored = write(&self.entries);
        let before = stored.len();
        stored.retain(|e| !e.id.starts_with(prefix));
        Ok(before - stored.len())
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, document: Document) -> EngineResult<()> {
        write(&self.docs).insert(document.id.clone(), document);
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<Document>> {
        Ok(read(&self.docs).get(id).cloned())
    }

    async fn delete(&self, id: &str) -> EngineResult<bool> {
        Ok(write(&self.docs).remove(id).is_some())
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        let mut keys: Vec<String> = read(&self.docs).keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Default)]
pub struct MemoryListStore {
    lists: RwLock<BTreeMap<String, Vec<String>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push(&self, key: &str, values: Vec<String>) -> EngineResult<()> {
        write(&self.lists)
            .entry(key.to_string())
            .or_default()
            .extend(values);
        Ok(())
    }

    async fn range(&self, key: &str) -> EngineResult<Vec<String>> {
        Ok(read(&self.lists).get(key).cloned().unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        Ok(read(&self.lists)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(read(&self.values).get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> EngineResult<()> {
        write(&self.values).insert(key.to_string(), value);
        Ok(())
    }
}
