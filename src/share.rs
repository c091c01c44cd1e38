//! Public/private share flags for conversations.
//!
//! Share state lives in the [`KvStore`] under `"share:{conversation_id}"`, a
//! namespace disjoint from history keys (`"{user_id}/{conversation_id}"`),
//! so the two can share one backing database. The stored value is a JSON
//! object; fields other than `public` and `user_id` are preserved on update.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::history::validate_identifier;
use crate::models::ShareState;
use crate::store::{retry_once, KvStore};

pub fn share_key(conversation_id: &str) -> String {
    format!("share:{}", conversation_id)
}

#[derive(Clone)]
pub struct ShareStore {
    kv: Arc<dyn KvStore>,
}

impl ShareStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn load(&self, conversation_id: &str) -> EngineResult<Map<String, Value>> {
        let key = share_key(conversation_id);
        let raw = retry_once("share read", || self.kv.get(&key)).await?;
        match raw {
            None => Ok(Map::new()),
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) | Err(_) => Err(EngineError::Storage(format!(
                    "share state for '{}' is not a JSON object",
                    conversation_id
                ))),
            },
        }
    }

    fn state_from(conversation_id: &str, map: &Map<String, Value>) -> ShareState {
        ShareState {
            conversation_id: conversation_id.to_string(),
            public: map.get("public").and_then(Value::as_bool).unwrap_or(false),
            user_id: map
                .get("user_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Marks the conversation public and records `user_id` as its owner.
    pub async fn set_public(&self, conversation_id: &str, user_id: &str) -> EngineResult<ShareState> {
        validate_identifier("conversation_id", conversation_id)?;
        validate_identifier("user_id", user_id)?;

        let mut map = self.load(conversation_id).await?;
        map.insert("public".to_string(), Value::Bool(true));
        map.insert("user_id".to_string(), Value::String(user_id.to_string()));
        self.kv
            .set(&share_key(conversation_id), Value::Object(map.clone()).to_string())
            .await?;
        Ok(Self::state_from(conversation_id, &map))
    }

    /// Marks the conversation private. The recorded owner is kept.
    pub async fn set_private(&self, conversation_id: &str, user_id: &str) -> EngineResult<ShareState> {
        validate_identifier("conversation_id", conversation_id)?;
        validate_identifier("user_id", user_id)?;

        let mut map = self.load(conversation_id).await?;
        map.insert("public".to_string(), Value::Bool(false));
        self.kv
            .set(&share_key(conversation_id), Value::Object(map.clone()).to_string())
            .await?;
        Ok(Self::state_from(conversation_id, &map))
    }

    /// Current state. Unknown conversations read as private with no owner.
    pub async fn get_public(&self, conversation_id: &str) -> EngineResult<ShareState> {
        validate_identifier("conversation_id", conversation_id)?;
        let map = self.load(conversation_id).await?;
        Ok(Self::state_from(conversation_id, &map))
    }

    /// True when the conversation is public and owned by `user_id`.
    pub async fn is_shared_by(&self, conversation_id: &str, user_id: &str) -> EngineResult<bool> {
        let state = self.get_public(conversation_id).await?;
        Ok(state.public && state.user_id.as_deref() == Some(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[tokio::test]
    async fn test_share_scenario() {
        let shares = ShareStore::new(Arc::new(MemoryKvStore::new()));

        let state = shares.get_public("c").await.unwrap();
        assert!(!state.public);
        assert_eq!(state.user_id, None);

        shares.set_public("c", "u").await.unwrap();
        let state = shares.get_public("c").await.unwrap();
        assert!(state.public);
        assert_eq!(state.user_id.as_deref(), Some("u"));
        assert!(shares.is_shared_by("c", "u").await.unwrap());

        shares.set_private("c", "u").await.unwrap();
        let state = shares.get_public("c").await.unwrap();
        assert!(!state.public);
        assert_eq!(state.user_id.as_deref(), Some("u"));
        assert!(!shares.is_shared_by("c", "u").await.unwrap());
    }

    #[tokio::test]
    async fn test_private_before_public_has_no_owner() {
        let shares = ShareStore::new(Arc::new(MemoryKvStore::new()));
        let state = shares.set_private("c", "u").await.unwrap();
        assert!(!state.public);
        assert_eq!(state.user_id, None);
    }

    #[tokio::test]
    async fn test_extra_fields_preserved() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("share:c", r#"{"title":"Kraków","public":false}"#.to_string())
            .await
            .unwrap();
        let shares = ShareStore::new(kv.clone());
        shares.set_public("c", "u").await.unwrap();

        let raw = kv.get("share:c").await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["title"], "Kraków");
        assert_eq!(value["public"], true);
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let shares = ShareStore::new(Arc::new(MemoryKvStore::new()));
        assert!(matches!(
            shares.set_public("c/1", "u").await,
            Err(EngineError::InvalidIdentifier(_))
        ));
        assert!(shares.get_public("").await.is_err());
    }
}
