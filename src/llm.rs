//! Chat model abstraction and the OpenAI-compatible streaming client.
//!
//! The agent talks to a model only through [`ChatModel::complete`]: a list of
//! messages and tool specs in, a [`ModelReply`] (text and/or tool calls) out.
//! Tokens are reported as they arrive through an optional callback, which the
//! HTTP layer forwards as `on_chat_model_stream` events.
//!
//! [`OpenAiChatModel`] uses `POST {base_url}/chat/completions` with
//! `stream: true` and reassembles server-sent `data:` lines, including tool
//! call fragments that arrive split across many deltas. Transient failures
//! (429, 5xx, network) are retried with the same backoff as the embedding
//! providers, but only before the first byte of the stream.

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::backoff;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model. May be malformed.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }

    /// OpenAI chat-completions wire shape.
    pub fn to_openai(&self) -> Value {
        let mut message = json!({
            "role": self.role,
            "content": self.content,
        });
        if !self.tool_calls.is_empty() {
            message["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    })
                })
                .collect();
        }
        if let Some(id) = &self.tool_call_id {
            message["tool_call_id"] = json!(id);
        }
        message
    }
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Callback receiving each streamed text fragment.
pub type TokenSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        on_token: Option<TokenSink<'_>>,
    ) -> EngineResult<ModelReply>;
}

pub fn create_chat_model(config: &LlmConfig) -> anyhow::Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChatModel)),
        "openai" => Ok(Box::new(OpenAiChatModel::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _on_token: Option<TokenSink<'_>>,
    ) -> EngineResult<ModelReply> {
        Err(EngineError::Model("chat model is disabled".to_string()))
    }
}

pub struct OpenAiChatModel {
    model: String,
    base_url: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(ChatMessage::to_openai).collect::<Vec<_>>(),
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolSpec::to_openai).collect();
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    /// Sends the request, retrying until a successful response starts streaming.
    async fn open_stream(&self, body: &Value) -> anyhow::Result<reqwest::Response> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            match self
                .client
                .post(&url)
                .bearer_auth(&api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("chat API error {}: {}", status, body_text));
                        continue;
                    }
                    anyhow::bail!("chat API error {}: {}", status, body_text);
                }
                Err(e) => last_err = Some(e.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat completion failed after retries")))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        on_token: Option<TokenSink<'_>>,
    ) -> EngineResult<ModelReply> {
        let body = self.request_body(messages, tools);
        let response = self
            .open_stream(&body)
            .await
            .map_err(|e| EngineError::Model(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut acc = StreamAccumulator::default();

        'read: while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| EngineError::Model(format!("stream interrupted: {}", e)))?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if acc.feed_line(line.trim_end(), on_token)? {
                    break 'read;
                }
            }
        }
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            acc.feed_line(line.trim_end(), on_token)?;
        }

        Ok(acc.finish())
    }
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles a chat-completions SSE stream into a [`ModelReply`].
#[derive(Default)]
pub struct StreamAccumulator {
    content: String,
    calls: BTreeMap<u64, PartialCall>,
}

impl StreamAccumulator {
    /// Consume one SSE line. Returns `true` at `data: [DONE]`.
    pub fn feed_line(&mut self, line: &str, on_token: Option<TokenSink<'_>>) -> EngineResult<bool> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            return Ok(true);
        }
        if data.is_empty() {
            return Ok(false);
        }

        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| EngineError::Model(format!("malformed stream chunk: {}", e)))?;
        if let Some(error) = chunk.get("error") {
            return Err(EngineError::Model(error.to_string()));
        }

        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            return Ok(false);
        };

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.content.push_str(text);
                if let Some(sink) = on_token {
                    sink(text);
                }
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for call in calls {
                let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                    entry.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(|v| v.as_str()) {
                    entry.name.push_str(name);
                }
                if let Some(args) = call.pointer("/function/arguments").and_then(|v| v.as_str()) {
                    entry.arguments.push_str(args);
                }
            }
        }

        Ok(false)
    }

    pub fn finish(self) -> ModelReply {
        ModelReply {
            content: self.content,
            tool_calls: self
                .calls
                .into_iter()
                .map(|(index, call)| ToolCall {
                    id: if call.id.is_empty() {
                        format!("call_{}", index)
                    } else {
                        call.id
                    },
                    name: call.name,
                    arguments: call.arguments,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_accumulates_content_and_reports_tokens() {
        let seen = Mutex::new(Vec::new());
        let sink = |t: &str| seen.lock().unwrap().push(t.to_string());
        let mut acc = StreamAccumulator::default();
        for line in [
            r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Rita was "}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"born in Kraków."}}]}"#,
        ] {
            assert!(!acc.feed_line(line, Some(&sink)).unwrap());
        }
        assert!(acc.feed_line("data: [DONE]", Some(&sink)).unwrap());

        let reply = acc.finish();
        assert_eq!(reply.content, "Rita was born in Kraków.");
        assert!(reply.tool_calls.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["Rita was ", "born in Kraków."]);
    }

    #[test]
    fn test_reassembles_split_tool_calls() {
        let mut acc = StreamAccumulator::default();
        for line in [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"personal_testimony_retriever","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"short_answer_retriever","arguments":"{\"query\":\"ghetto\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Rita\"}"}}]}}]}"#,
        ] {
            acc.feed_line(line, None).unwrap();
        }
        let reply = acc.finish();
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].id, "call_a");
        assert_eq!(reply.tool_calls[0].name, "personal_testimony_retriever");
        assert_eq!(reply.tool_calls[0].arguments, r#"{"query":"Rita"}"#);
        assert_eq!(reply.tool_calls[1].name, "short_answer_retriever");
    }

    #[test]
    fn test_error_chunk_is_model_error() {
        let mut acc = StreamAccumulator::default();
        let err = acc
            .feed_line(r#"data: {"error":{"message":"overloaded"}}"#, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Model(_)));
    }

    #[test]
    fn test_message_wire_shape() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "short_answer_retriever".into(),
            arguments: "{\"query\":\"x\"}".into(),
        };
        let assistant = ChatMessage::assistant_tool_calls("", vec![call]).to_openai();
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "short_answer_retriever");

        let tool = ChatMessage::tool_result("call_1", "docs").to_openai();
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }
}
