//! HTTP API for the answer engine.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | no | Health check (returns version) |
//! | `POST` | `/chat/stream_events` | yes | One agent turn as a server-sent event stream |
//! | `POST` | `/chat/invoke` | yes | One agent turn, answer returned as `{"output"}` |
//! | `GET`  | `/user_history` | yes | Conversation keys of a user, or every conversation with `return_chats=true` |
//! | `GET`  | `/chat_history` | yes | Records of one conversation |
//! | `POST` | `/share/set_public` | yes | Mark a conversation public |
//! | `POST` | `/share/set_private` | yes | Mark a conversation private |
//! | `GET`  | `/share/get_public` | no | Share state of a conversation |
//! | `GET`  | `/share/get_history` | no | Records of a conversation shared publicly by its owner |
//! | `POST` | `/create_summary` | yes | Summaries for a batch of transcripts, in input order |
//!
//! History records are returned as stored, one JSON string per message
//! (`{"type":"human"|"ai","data":{"content":...}}`), oldest first.
//!
//! # Authentication
//!
//! Authenticated routes require `Authorization: Bearer <jwt>`, verified by
//! [`TokenVerifier`](crate::auth::TokenVerifier). Missing or invalid tokens
//! get `403`.
//!
//! # Streaming
//!
//! `/chat/stream_events` answers with `text/event-stream`:
//!
//! ```text
//! event: metadata   {"run_id": "..."}
//! event: data       {"event": "on_tool_start" | "on_tool_end" | "on_chat_model_stream" | "on_chain_end", ...}
//! event: end
//! ```
//!
//! A failed turn emits `event: error` with `{"status_code", "message"}` and
//! closes the stream. The turn runs in its own task, which is aborted when
//! the client disconnects.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "user_id is required" } }
//! ```

use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentEvent, TurnRequest};
use crate::config::{Config, ServerConfig};
use crate::context::AppContext;
use crate::error::{EngineError, EngineResult};
use crate::history::validate_identifier;

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let ctx = AppContext::from_config(config.clone()).await?;
    let app = router(ctx)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("answer engine listening on http://{}", bind_addr);
    println!("answer engine listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full route table over a ready context.
pub fn router(ctx: AppContext) -> anyhow::Result<Router> {
    let cors = cors_layer(&ctx.config.server)?;

    let protected = Router::new()
        .route("/chat/stream_events", post(handle_stream_events))
        .route("/chat/invoke", post(handle_invoke))
        .route("/user_history", get(handle_user_history))
        .route("/chat_history", get(handle_chat_history))
        .route("/share/set_public", post(handle_set_public))
        .route("/share/set_private", post(handle_set_private))
        .route("/create_summary", post(handle_create_summary))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_auth));

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/share/get_public", get(handle_get_public))
        .route("/share/get_history", get(handle_get_history));

    Ok(public.merge(protected).layer(cors).with_state(ctx))
}

fn cors_layer(config: &ServerConfig) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = config
        .cors_origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = err.code(), "request failed: {}", err);
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn required(name: &str, value: Option<String>) -> Result<String, AppError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request(format!("{} is required", name)))
}

// ============ Auth ============

async fn require_auth(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let verifier = ctx
        .verifier
        .as_ref()
        .ok_or_else(|| EngineError::Auth("no public key configured".to_string()))?;
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    verifier.verify_header(header)?;
    Ok(next.run(request).await)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Chat ============

/// `input` may be a bare string or `{"input": "..."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChatInput {
    Text(String),
    Nested { input: String },
}

#[derive(Deserialize)]
struct Configurable {
    #[serde(rename = "userId", alias = "user_id")]
    user_id: Option<String>,
    #[serde(rename = "conversationId", alias = "conversation_id")]
    conversation_id: Option<String>,
}

#[derive(Deserialize)]
struct RunnableConfig {
    configurable: Option<Configurable>,
}

#[derive(Deserialize)]
struct ChatRequest {
    input: ChatInput,
    #[serde(default)]
    configurable: Option<Configurable>,
    #[serde(default)]
    config: Option<RunnableConfig>,
}

impl ChatRequest {
    fn into_turn(self) -> Result<TurnRequest, AppError> {
        let configurable = self
            .configurable
            .or_else(|| self.config.and_then(|c| c.configurable));
        let (user_id, conversation_id) = match configurable {
            Some(c) => (c.user_id, c.conversation_id),
            None => (None, None),
        };
        let user_id = required("userId", user_id)?;
        let conversation_id = required("conversationId", conversation_id)?;
        validate_identifier("user_id", &user_id)?;
        validate_identifier("conversation_id", &conversation_id)?;

        let input = match self.input {
            ChatInput::Text(text) | ChatInput::Nested { input: text } => text,
        };
        if input.trim().is_empty() {
            return Err(bad_request("input must not be empty"));
        }
        Ok(TurnRequest {
            user_id,
            conversation_id,
            input,
        })
    }
}

#[derive(Serialize)]
struct InvokeResponse {
    output: String,
}

async fn handle_invoke(
    State(ctx): State<AppContext>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<InvokeResponse>, AppError> {
    let Json(body) = payload?;
    let request = body.into_turn()?;
    let outcome = ctx.agent.run_turn(&request, None).await?;
    Ok(Json(InvokeResponse {
        output: outcome.answer,
    }))
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn data_event(run_id: &str, event: &str, name: &str, data: serde_json::Value) -> Event {
    let payload = json!({
        "event": event,
        "name": name,
        "run_id": run_id,
        "tags": [],
        "data": data,
    });
    Event::default().event("data").data(payload.to_string())
}

fn agent_event_to_sse(run_id: &str, event: AgentEvent) -> Option<Event> {
    match event {
        AgentEvent::StateChanged(_) => None,
        AgentEvent::Token(text) => Some(data_event(
            run_id,
            "on_chat_model_stream",
            "chat_model",
            json!({ "chunk": { "content": text } }),
        )),
        AgentEvent::ToolStart { name, input, .. } => Some(data_event(
            run_id,
            "on_tool_start",
            &name,
            json!({ "input": { "query": input } }),
        )),
        AgentEvent::ToolEnd {
            name,
            output,
            failed,
            ..
        } => Some(data_event(
            run_id,
            "on_tool_end",
            &name,
            json!({ "output": output, "failed": failed }),
        )),
    }
}

async fn run_streamed_turn(ctx: AppContext, request: TurnRequest, run_id: String, out: UnboundedSender<Event>) {
    let (agent_tx, mut agent_rx) = unbounded_channel::<AgentEvent>();
    let turn = ctx.agent.run_turn(&request, Some(&agent_tx));
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            biased;
            Some(event) = agent_rx.recv() => {
                if let Some(sse) = agent_event_to_sse(&run_id, event) {
                    if out.send(sse).is_err() {
                        return;
                    }
                }
            }
            result = &mut turn => break result,
        }
    };
    while let Ok(event) = agent_rx.try_recv() {
        if let Some(sse) = agent_event_to_sse(&run_id, event) {
            let _ = out.send(sse);
        }
    }

    match result {
        Ok(outcome) => {
            let _ = out.send(data_event(
                &run_id,
                "on_chain_end",
                "agent",
                json!({ "output": outcome.answer }),
            ));
            let _ = out.send(Event::default().event("end"));
        }
        Err(err) => {
            warn!(run_id = %run_id, "streamed turn failed: {}", err);
            let _ = out.send(
                Event::default().event("error").data(
                    json!({ "status_code": err.status_code(), "message": err.to_string() })
                        .to_string(),
                ),
            );
        }
    }
}

async fn handle_stream_events(
    State(ctx): State<AppContext>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(body) = payload?;
    let request = body.into_turn()?;
    let run_id = Uuid::new_v4().to_string();

    let (tx, rx) = unbounded_channel::<Event>();
    let _ = tx.send(
        Event::default()
            .event("metadata")
            .data(json!({ "run_id": run_id }).to_string()),
    );
    let task = tokio::spawn(run_streamed_turn(ctx, request, run_id, tx));
    let guard = AbortOnDrop(task);

    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event), (rx, guard)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============ History ============

#[derive(Deserialize)]
struct UserHistoryParams {
    user_id: Option<String>,
    #[serde(default)]
    return_chats: bool,
}

async fn handle_user_history(
    State(ctx): State<AppContext>,
    Query(params): Query<UserHistoryParams>,
) -> Result<Response, AppError> {
    let user_id = required("user_id", params.user_id)?;
    if params.return_chats {
        let all: BTreeMap<String, Vec<String>> = ctx.history.read_all(&user_id).await?;
        Ok(Json(all).into_response())
    } else {
        let keys = ctx.history.list_conversations(&user_id).await?;
        Ok(Json(keys).into_response())
    }
}

#[derive(Deserialize)]
struct ConversationParams {
    user_id: Option<String>,
    conversation_id: Option<String>,
}

async fn handle_chat_history(
    State(ctx): State<AppContext>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Vec<String>>, AppError> {
    let user_id = required("user_id", params.user_id)?;
    let conversation_id = required("conversation_id", params.conversation_id)?;
    Ok(Json(ctx.history.read_raw(&user_id, &conversation_id).await?))
}

// ============ Sharing ============

#[derive(Deserialize)]
struct ShareParams {
    conversation_id: Option<String>,
    user_id: Option<String>,
}

async fn handle_set_public(
    State(ctx): State<AppContext>,
    Query(params): Query<ShareParams>,
) -> Result<Response, AppError> {
    let conversation_id = required("conversation_id", params.conversation_id)?;
    let user_id = required("user_id", params.user_id)?;
    let state = ctx.shares.set_public(&conversation_id, &user_id).await?;
    Ok(Json(state).into_response())
}

async fn handle_set_private(
    State(ctx): State<AppContext>,
    Query(params): Query<ShareParams>,
) -> Result<Response, AppError> {
    let conversation_id = required("conversation_id", params.conversation_id)?;
    let user_id = required("user_id", params.user_id)?;
    let state = ctx.shares.set_private(&conversation_id, &user_id).await?;
    Ok(Json(state).into_response())
}

#[derive(Serialize)]
struct PublicResponse {
    public: bool,
    user_id: Option<String>,
}

async fn handle_get_public(
    State(ctx): State<AppContext>,
    Query(params): Query<ShareParams>,
) -> Result<Json<PublicResponse>, AppError> {
    let conversation_id = required("conversation_id", params.conversation_id)?;
    let state = ctx.shares.get_public(&conversation_id).await?;
    Ok(Json(PublicResponse {
        public: state.public,
        user_id: state.user_id,
    }))
}

async fn handle_get_history(
    State(ctx): State<AppContext>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Vec<String>>, AppError> {
    let user_id = required("user_id", params.user_id)?;
    let conversation_id = required("conversation_id", params.conversation_id)?;
    if !ctx.shares.is_shared_by(&conversation_id, &user_id).await? {
        return Err(EngineError::NotFound(format!(
            "conversation '{}' is not shared",
            conversation_id
        ))
        .into());
    }
    Ok(Json(ctx.history.read_raw(&user_id, &conversation_id).await?))
}

// ============ POST /create_summary ============

#[derive(Deserialize)]
struct SummaryRequest {
    histories: Vec<String>,
}

async fn handle_create_summary(
    State(ctx): State<AppContext>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Json<Vec<String>>, AppError> {
    let Json(body) = payload?;
    let summaries = ctx
        .summarizer
        .summarize_all(&body.histories)
        .await
        .into_iter()
        .collect::<EngineResult<Vec<String>>>()?;
    Ok(Json(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Components;
    use crate::embedding::HashEmbedder;
    use crate::error::EngineResult;
    use crate::llm::{ChatMessage, ChatModel, ModelReply, TokenSink, ToolSpec};
    use crate::store::{MemoryDocumentStore, MemoryKvStore, MemoryListStore, MemoryVectorIndex};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[test]
    fn test_chat_request_shapes() {
        let body: ChatRequest = serde_json::from_str(
            r#"{"input":"Hi","configurable":{"userId":"u1","conversationId":"c1"}}"#,
        )
        .unwrap();
        let turn = body.into_turn().unwrap();
        assert_eq!((turn.user_id.as_str(), turn.input.as_str()), ("u1", "Hi"));

        let body: ChatRequest = serde_json::from_str(
            r#"{"input":{"input":"Hi"},"config":{"configurable":{"userId":"u1","conversationId":"c1"}}}"#,
        )
        .unwrap();
        assert_eq!(body.into_turn().unwrap().conversation_id, "c1");
    }

    #[test]
    fn test_chat_request_rejections() {
        let body: ChatRequest =
            serde_json::from_str(r#"{"input":"Hi","configurable":{"userId":"u1"}}"#).unwrap();
        assert_eq!(body.into_turn().unwrap_err().status, StatusCode::BAD_REQUEST);

        let body: ChatRequest = serde_json::from_str(
            r#"{"input":"Hi","configurable":{"userId":"u/1","conversationId":"c1"}}"#,
        )
        .unwrap();
        assert_eq!(body.into_turn().unwrap_err().code, "bad_request");

        let body: ChatRequest = serde_json::from_str(
            r#"{"input":"  ","configurable":{"userId":"u1","conversationId":"c1"}}"#,
        )
        .unwrap();
        assert!(body.into_turn().is_err());
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: AppError = EngineError::Auth("nope".into()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "forbidden");
        let err: AppError = EngineError::Storage("down".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_cors_origins() {
        assert!(cors_layer(&ServerConfig::default()).is_ok());
        let config = ServerConfig {
            cors_origins: vec!["http://localhost:3000".into()],
            ..ServerConfig::default()
        };
        assert!(cors_layer(&config).is_ok());
        let config = ServerConfig {
            cors_origins: vec!["bad\norigin".into()],
            ..ServerConfig::default()
        };
        assert!(cors_layer(&config).is_err());
    }

    /// Wakes `0` when dropped.
    struct NotifyOnDrop(Arc<Notify>);

    impl Drop for NotifyOnDrop {
        fn drop(&mut self) {
            self.0.notify_one();
        }
    }

    /// A model whose completion never finishes.
    struct StalledModel {
        started: Arc<Notify>,
        dropped: Arc<Notify>,
    }

    #[async_trait]
    impl ChatModel for StalledModel {
        fn model_name(&self) -> &str {
            "stalled"
        }
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
            _on_token: Option<TokenSink<'_>>,
        ) -> EngineResult<ModelReply> {
            let _guard = NotifyOnDrop(self.dropped.clone());
            self.started.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dropping_event_stream_aborts_turn() {
        let started = Arc::new(Notify::new());
        let dropped = Arc::new(Notify::new());
        let components = Components {
            embedder: Arc::new(HashEmbedder::new(32)),
            index: Arc::new(MemoryVectorIndex::new()),
            documents: Arc::new(MemoryDocumentStore::new()),
            lists: Arc::new(MemoryListStore::new()),
            kv: Arc::new(MemoryKvStore::new()),
            model: Arc::new(StalledModel {
                started: started.clone(),
                dropped: dropped.clone(),
            }),
        };
        let ctx = AppContext::assemble(Config::minimal(), components, None).unwrap();

        let body: ChatRequest = serde_json::from_str(
            r#"{"input":"Where was Rita born?","configurable":{"userId":"u1","conversationId":"c1"}}"#,
        )
        .unwrap();
        let response = handle_stream_events(State(ctx.clone()), Ok(Json(body)))
            .await
            .unwrap()
            .into_response();
        let mut frames = response.into_body().into_data_stream();

        let first = frames.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("event: metadata"));
        started.notified().await;

        drop(frames);
        tokio::time::timeout(Duration::from_secs(1), dropped.notified())
            .await
            .expect("model call aborted with the stream");
        assert!(ctx.history.read("u1", "c1").await.unwrap().is_empty());
    }
}

