//! Per-(user, conversation) chat history.
//!
//! Each conversation is one append-only list under the key
//! `"{user_id}/{conversation_id}"`. Entries are JSON records of the form
//! `{"type": "human" | "ai", "data": {"content": "..."}}`, which is what
//! existing history consumers (the web client included) parse.
//!
//! Identifiers must match `^[A-Za-z0-9_-]+$`. They are checked before any
//! store access, so a bad id can never address another user's keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::{ConversationTurn, Role};
use crate::store::{retry_once, ListStore};

/// Rejects empty ids and anything outside `[A-Za-z0-9_-]`.
pub fn validate_identifier(kind: &str, value: &str) -> EngineResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier(format!(
            "{} '{}' must be non-empty and contain only alphanumeric characters, hyphens, and underscores",
            kind, value
        )))
    }
}

pub fn history_key(user_id: &str, conversation_id: &str) -> EngineResult<String> {
    validate_identifier("user_id", user_id)?;
    validate_identifier("conversation_id", conversation_id)?;
    Ok(format!("{}/{}", user_id, conversation_id))
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    #[serde(rename = "type")]
    kind: String,
    data: StoredContent,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredContent {
    content: String,
}

pub fn encode_turn(turn: &ConversationTurn) -> EngineResult<String> {
    let kind = match turn.role {
        Role::User => "human",
        Role::Assistant => "ai",
    };
    Ok(serde_json::to_string(&StoredMessage {
        kind: kind.to_string(),
        data: StoredContent {
            content: turn.content.clone(),
        },
    })?)
}

pub fn decode_turn(raw: &str) -> EngineResult<ConversationTurn> {
    let message: StoredMessage = serde_json::from_str(raw)
        .map_err(|e| EngineError::Storage(format!("malformed history entry: {}", e)))?;
    let role = match message.kind.as_str() {
        "human" | "user" => Role::User,
        "ai" | "assistant" => Role::Assistant,
        other => {
            return Err(EngineError::Storage(format!(
                "unsupported history entry type '{}'",
                other
            )))
        }
    };
    Ok(ConversationTurn {
        role,
        content: message.data.content,
    })
}

#[derive(Clone)]
pub struct SessionHistoryStore {
    lists: Arc<dyn ListStore>,
}

impl SessionHistoryStore {
    pub fn new(lists: Arc<dyn ListStore>) -> Self {
        Self { lists }
    }

    pub async fn append(&self, user_id: &str, conversation_id: &str, turn: &ConversationTurn) -> EngineResult<()> {
        let key = history_key(user_id, conversation_id)?;
        self.lists.push(&key, vec![encode_turn(turn)?]).await
    }

    /// Appends a user message and the assistant's answer in one write.
    pub async fn append_exchange(
        &self,
        user_id: &str,
        conversation_id: &str,
        input: &str,
        answer: &str,
    ) -> EngineResult<()> {
        let key = history_key(user_id, conversation_id)?;
        let values = vec![
            encode_turn(&ConversationTurn::user(input))?,
            encode_turn(&ConversationTurn::assistant(answer))?,
        ];
        self.lists.push(&key, values).await
    }

    /// Turns in append order. Entries that cannot be decoded are skipped.
    pub async fn read(&self, user_id: &str, conversation_id: &str) -> EngineResult<Vec<ConversationTurn>> {
        let raw = self.read_raw(user_id, conversation_id).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match decode_turn(entry) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    tracing::warn!(user_id, conversation_id, "skipping history entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Stored records as-is, in append order.
    pub async fn read_raw(&self, user_id: &str, conversation_id: &str) -> EngineResult<Vec<String>> {
        let key = history_key(user_id, conversation_id)?;
        retry_once("history read", || self.lists.range(&key)).await
    }

    /// Keys (`"{user_id}/{conversation_id}"`) of every conversation of `user_id`.
    pub async fn list_conversations(&self, user_id: &str) -> EngineResult<Vec<String>> {
        validate_identifier("user_id", user_id)?;
        let prefix = format!("{}/", user_id);
        retry_once("history scan", || self.lists.keys_with_prefix(&prefix)).await
    }

    /// Every conversation of `user_id` with its raw records, fetched concurrently.
    pub async fn read_all(&self, user_id: &str) -> EngineResult<BTreeMap<String, Vec<String>>> {
        let keys = self.list_conversations(user_id).await?;
        let lists = futures_util::future::try_join_all(
            keys.iter()
                .map(|key| retry_once("history read", move || self.lists.range(key))),
        )
        .await?;
        Ok(keys.into_iter().zip(lists).collect())
    }
}
