//! Filesystem document store: one JSON file per parent document.
//!
//! File names are the hex encoding of the document id, so ids containing
//! path separators or other awkward characters stay inside the root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::models::Document;

use super::DocumentStore;

pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", hex::encode(id.as_bytes())))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn put(&self, document: Document) -> EngineResult<()> {
        let path = self.path_for(&document.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&document)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<Document>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                EngineError::Storage(format!("corrupt document '{}': {}", id, e))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> EngineResult<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(id) = hex::decode(stem).ok().and_then(|b| String::from_utf8(b).ok()) {
                keys.push(id);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
