//! Upstash REST backends.
//!
//! - [`UpstashVectorIndex`]: the Upstash Vector HTTP API (`/upsert`,
//!   `/query`, `/delete`, all scoped to a namespace).
//! - [`UpstashRedis`]: the Upstash Redis REST API, where every command is a
//!   JSON array POSTed to the database URL. Implements both [`ListStore`]
//!   and [`KvStore`].
//!
//! Both authenticate with `Authorization: Bearer <token>`. URL and token are
//! read from the environment variables named in `[storage.upstash_*]`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{UpstashRedisConfig, UpstashVectorConfig};
use crate::error::{EngineError, EngineResult};
use crate::models::{IndexEntry, IndexHit, Metadata};

use super::{KvStore, ListStore, VectorIndex};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const SCAN_COUNT: u32 = 100;

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} not set", name))
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

/// POSTs `body` and unwraps the `{"result": ...}` / `{"error": ...}` envelope.
async fn call(client: &reqwest::Client, url: &str, token: &str, body: &Value) -> EngineResult<Value> {
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .map_err(EngineError::storage)?;

    let status = response.status();
    let json: Value = response.json().await.map_err(EngineError::storage)?;
    unwrap_envelope(status.as_u16(), json)
}

fn unwrap_envelope(status: u16, json: Value) -> EngineResult<Value> {
    if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
        return Err(EngineError::Storage(format!("upstash error {}: {}", status, error)));
    }
    if !(200..300).contains(&status) {
        return Err(EngineError::Storage(format!("upstash error {}: {}", status, json)));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| EngineError::Storage("upstash response missing result".to_string()))
}

// ============ Vector ============

pub struct UpstashVectorIndex {
    client: reqwest::Client,
    url: String,
    token: String,
    namespace: String,
}

impl UpstashVectorIndex {
    pub fn new(url: impl Into<String>, token: impl Into<String>, namespace: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            namespace: namespace.into(),
        })
    }

    pub fn from_config(config: &UpstashVectorConfig) -> Result<Self> {
        Self::new(
            env_var(&config.url_env)?,
            env_var(&config.token_env)?,
            config.namespace.clone(),
        )
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/{}/{}", self.url, op, self.namespace)
    }
}

#[async_trait]
impl VectorIndex for UpstashVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> EngineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = entries
            .into_iter()
            .map(|e| json!({"id": e.id, "vector": e.vector, "metadata": e.metadata}))
            .collect();
        call(&self.client, &self.endpoint("upsert"), &self.token, &Value::from(body)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> EngineResult<Vec<IndexHit>> {
        let body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
        });
        let result = call(&self.client, &self.endpoint("query"), &self.token, &body).await?;
        parse_query_result(&result).map_err(EngineError::storage)
    }

    async fn delete_prefix(&self, prefix: &str) -> EngineResult<usize> {
        let body = json!({ "prefix": prefix });
        let result = call(&self.client, &self.endpoint("delete"), &self.token, &body).await?;
        Ok(result.get("deleted").and_then(|d| d.as_u64()).unwrap_or(0) as usize)
    }
}

fn parse_query_result(result: &Value) -> Result<Vec<IndexHit>> {
    let items = result
        .as_array()
        .ok_or_else(|| anyhow!("query result is not an array"))?;

    items
        .iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("query hit missing id"))?;
            let score = item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            let metadata: Metadata = item
                .get("metadata")
                .and_then(|m| m.as_object())
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| {
                            let value = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), value)
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(IndexHit {
                id: id.to_string(),
                score,
                metadata,
            })
        })
        .collect()
}

// ============ Redis ============

pub struct UpstashRedis {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashRedis {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &UpstashRedisConfig) -> Result<Self> {
        Self::new(env_var(&config.url_env)?, env_var(&config.token_env)?)
    }

    async fn command(&self, args: Vec<Value>) -> EngineResult<Value> {
        call(&self.client, &self.url, &self.token, &Value::from(args)).await
    }
}

/// Escapes Redis glob metacharacters so `prefix` matches literally.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

fn string_array(value: &Value) -> EngineResult<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| EngineError::Storage("expected array result".to_string()))
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
}

#[async_trait]
impl ListStore for UpstashRedis {
    async fn push(&self, key: &str, values: Vec<String>) -> EngineResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut args = vec![json!("RPUSH"), json!(key)];
        args.extend(values.into_iter().map(Value::from));
        self.command(args).await?;
        Ok(())
    }

    async fn range(&self, key: &str) -> EngineResult<Vec<String>> {
        let result = self
            .command(vec![json!("LRANGE"), json!(key), json!(0), json!(-1)])
            .await?;
        string_array(&result)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let pattern = scan_pattern(prefix);
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();
        loop {
            let result = self
                .command(vec![
                    json!("SCAN"),
                    json!(cursor),
                    json!("MATCH"),
                    json!(pattern),
                    json!("COUNT"),
                    json!(SCAN_COUNT),
                ])
                .await?;
            let next = match result.get(0) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(EngineError::Storage("malformed SCAN reply".to_string())),
            };
            if let Some(batch) = result.get(1) {
                keys.extend(string_array(batch)?);
            }
            if next == "0" {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl KvStore for UpstashRedis {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let result = self.command(vec![json!("GET"), json!(key)]).await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn set(&self, key: &str, value: String) -> EngineResult<()> {
        self.command(vec![json!("SET"), json!(key), json!(value)]).await?;
        Ok(())
    }
}
