#![allow(dead_code)]

use answer_engine::auth::TokenVerifier;
use answer_engine::config::Config;
use answer_engine::context::{AppContext, Components};
use answer_engine::embedding::{DisabledEmbedder, Embedder, HashEmbedder};
use answer_engine::error::EngineResult;
use answer_engine::llm::{ChatMessage, ChatModel, ChatRole, ModelReply, TokenSink, ToolCall, ToolSpec};
use answer_engine::models::SourceDocument;
use answer_engine::prompts::SUMMARY_SYSTEM_PROMPT;
use answer_engine::server::router;
use answer_engine::store::{MemoryDocumentStore, MemoryKvStore, MemoryListStore, MemoryVectorIndex};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SIGNER_PRIVATE: &str = include_str!("../fixtures/signer_private.pem");
pub const SIGNER_PUBLIC: &str = include_str!("../fixtures/signer_public.pem");
pub const OTHER_PRIVATE: &str = include_str!("../fixtures/other_private.pem");

pub const RITA: &str = "Rita was born in Kraków in 1931. Her father owned a bakery near the market square.";
pub const TRAINS: &str = "The trains left the station at dawn. Nobody told us where we were going.";
pub const LIBERATION: &str = "Liberation came in April. The soldiers gave us bread and soup.";

/// A chat model that behaves like a retrieval agent without a network:
///
/// - a fresh user message gets a `personal_testimony_retriever` call with
///   the message as query;
/// - after a tool result it answers from the first retrieved document, or
///   says the information is incomplete when the tool failed;
/// - summary requests are answered with the transcript itself.
pub struct ScriptedModel;

fn words(content: &str, on_token: Option<TokenSink<'_>>) {
    if let Some(sink) = on_token {
        for word in content.split_inclusive(' ') {
            sink(word);
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
        on_token: Option<TokenSink<'_>>,
    ) -> EngineResult<ModelReply> {
        if messages.first().map(|m| m.content.as_str()) == Some(SUMMARY_SYSTEM_PROMPT) {
            let transcript = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            return Ok(ModelReply {
                content: transcript,
                tool_calls: Vec::new(),
            });
        }

        let last = messages.last().expect("at least one message");
        if last.role == ChatRole::User {
            return Ok(ModelReply {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_0".to_string(),
                    name: "personal_testimony_retriever".to_string(),
                    arguments: json!({ "query": last.content }).to_string(),
                }],
            });
        }

        let content = if last.content.contains("incomplete") {
            "I'm sorry, the information available is incomplete.".to_string()
        } else {
            let first = last
                .content
                .lines()
                .nth(1)
                .unwrap_or_default()
                .split(". ")
                .next()
                .unwrap_or_default()
                .trim_end_matches('.');
            format!("According to the testimony, {}.", first)
        };
        words(&content, on_token);
        Ok(ModelReply {
            content,
            tool_calls: Vec::new(),
        })
    }
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

pub fn sign_token(private_pem: &str, exp: u64) -> String {
    encode(
        &Header::new(Algorithm::RS256),
        &json!({ "sub": "user_1", "exp": exp }),
        &EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

pub fn bearer() -> String {
    format!("Bearer {}", sign_token(SIGNER_PRIVATE, now() + 600))
}

pub fn context_with(embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> AppContext {
    let components = Components {
        embedder,
        index: Arc::new(MemoryVectorIndex::new()),
        documents: Arc::new(MemoryDocumentStore::new()),
        lists: Arc::new(MemoryListStore::new()),
        kv: Arc::new(MemoryKvStore::new()),
        model,
    };
    let verifier = TokenVerifier::from_pem(SIGNER_PUBLIC.as_bytes(), 0).unwrap();
    AppContext::assemble(Config::minimal(), components, Some(verifier)).unwrap()
}

/// In-memory context with the three sample testimonies indexed.
pub async fn seeded_context() -> AppContext {
    let ctx = context_with(Arc::new(HashEmbedder::new(256)), Arc::new(ScriptedModel));
    let report = ctx
        .retriever
        .add_documents(vec![
            SourceDocument::new(RITA).with_id("rita"),
            SourceDocument::new(TRAINS).with_id("trains"),
            SourceDocument::new(LIBERATION).with_id("liberation"),
        ])
        .await;
    assert!(report.is_clean());
    ctx
}

/// Context whose retrieval always fails.
pub fn broken_retrieval_context() -> AppContext {
    context_with(Arc::new(DisabledEmbedder), Arc::new(ScriptedModel))
}

/// Serves `ctx` on an ephemeral port and returns its base URL.
pub async fn spawn_server(ctx: AppContext) -> String {
    let app = router(ctx).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// `(event, data)` pairs of a complete SSE body.
pub fn parse_sse(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                }
            }
            event.map(|e| (e, data.join("\n")))
        })
        .collect()
}
