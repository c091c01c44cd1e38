//! Core data models used throughout the answer engine.
//!
//! These types represent the documents, segments, index entries, and
//! conversation records that flow through ingestion, retrieval, and chat.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key that links a child segment to its stored parent.
pub const PARENT_ID_KEY: &str = "parent_id";

/// Metadata key carrying the id of the source document.
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// String-to-string metadata attached to documents and index entries.
pub type Metadata = BTreeMap<String, String>;

/// Ingestion input. A missing `id` is assigned a UUID before splitting.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    pub id: Option<String>,
    pub text: String,
    pub metadata: Metadata,
}

impl SourceDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A parent document as held by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A small segment carved out of a parent. Lives only inside the vector index.
#[derive(Debug, Clone)]
pub struct ChildSegment {
    pub id: String,
    pub text: String,
    pub parent_id: String,
    pub metadata: Metadata,
}

/// An embedded child segment ready for upsert.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl IndexEntry {
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get(PARENT_ID_KEY).map(String::as_str)
    }
}

/// A ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl IndexHit {
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get(PARENT_ID_KEY).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Public/private share flag for one conversation. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareState {
    pub conversation_id: String,
    pub public: bool,
    pub user_id: Option<String>,
}
