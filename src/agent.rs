//! The conversational agent: a tool-using loop over a [`ChatModel`].
//!
//! One call to [`ConversationAgent::run_turn`] walks these states:
//!
//! ```text
//! AwaitingInput ─► Planning ─┬─► Composing ─► Done
//!                    ▲       │
//!                    │       └─► ToolCall ─► ToolResult ─┐
//!                    └───────────────────────────────────┘
//! ```
//!
//! - **Planning**: the model sees the system prompt, prior history, the user
//!   message, and every tool call/result so far (the scratchpad).
//! - **ToolCall**: all calls from one reply run concurrently.
//! - **ToolResult**: results are appended in call order. A failed tool yields
//!   a notice telling the model the information is incomplete, and the loop
//!   continues.
//! - **Done**: the user message and answer are appended to history in one
//!   write. Nothing is persisted for a turn that errors or is cancelled.
//!
//! Malformed arguments, unknown tool names, and running past
//! `max_iterations` fail the turn with [`EngineError::Agent`].
//!
//! Cancellation is by drop: dropping the `run_turn` future drops every
//! in-flight model and tool call with it.

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::history::SessionHistoryStore;
use crate::llm::{ChatMessage, ChatModel, TokenSink};
use crate::models::Role;
use crate::prompts::{tool_failure_notice, SYSTEM_PROMPT};
use crate::tools::{ToolArgs, ToolRegistry};

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    AwaitingInput,
    Planning,
    ToolCall,
    ToolResult,
    Composing,
    Done,
}

/// Progress notifications for streaming clients.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StateChanged(AgentState),
    Token(String),
    ToolStart {
        call_id: String,
        name: String,
        input: String,
    },
    ToolEnd {
        call_id: String,
        name: String,
        output: String,
        failed: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScratchpadEntry {
    pub call_id: String,
    pub tool: String,
    pub query: String,
    pub output: String,
    pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    pub scratchpad: Vec<ScratchpadEntry>,
    pub trace: Vec<AgentState>,
}

/// Records state transitions and forwards events to an optional listener.
struct Progress<'a> {
    trace: Vec<AgentState>,
    events: Option<&'a UnboundedSender<AgentEvent>>,
}

impl Progress<'_> {
    fn enter(&mut self, state: AgentState) {
        debug!(?state, "agent transition");
        self.trace.push(state);
        self.emit(AgentEvent::StateChanged(state));
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = self.events {
            // A closed receiver means the client went away; the turn still completes.
            let _ = tx.send(event);
        }
    }
}

pub struct ConversationAgent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    history: SessionHistoryStore,
    system_prompt: String,
    max_iterations: usize,
}

impl ConversationAgent {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolRegistry, history: SessionHistoryStore) -> Self {
        Self {
            model,
            tools,
            history,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn history(&self) -> &SessionHistoryStore {
        &self.history
    }

    /// Answer one user message, persisting the exchange on success.
    pub async fn run_turn(
        &self,
        request: &TurnRequest,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> EngineResult<TurnOutcome> {
        let mut progress = Progress {
            trace: Vec::new(),
            events,
        };
        progress.enter(AgentState::AwaitingInput);

        let past = self
            .history
            .read(&request.user_id, &request.conversation_id)
            .await?;

        let mut messages = Vec::with_capacity(past.len() + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        for turn in past {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content),
                Role::Assistant => ChatMessage::assistant(turn.content),
            });
        }
        messages.push(ChatMessage::user(&request.input));

        let specs = self.tools.specs();
        let forward_token = |text: &str| {
            if let Some(tx) = events {
                let _ = tx.send(AgentEvent::Token(text.to_string()));
            }
        };
        let on_token: TokenSink<'_> = &forward_token;
        let mut scratchpad: Vec<ScratchpadEntry> = Vec::new();

        for iteration in 0..self.max_iterations {
            progress.enter(AgentState::Planning);

            let reply = self.model.complete(&messages, &specs, Some(on_token)).await?;

            if reply.tool_calls.is_empty() {
                progress.enter(AgentState::Composing);

                let answer = reply.content;
                self.history
                    .append_exchange(
                        &request.user_id,
                        &request.conversation_id,
                        &request.input,
                        &answer,
                    )
                    .await?;

                progress.enter(AgentState::Done);
                return Ok(TurnOutcome {
                    answer,
                    scratchpad,
                    trace: progress.trace,
                });
            }

            // Validate every call before running any of them.
            let mut planned = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                if call.name.trim().is_empty() {
                    return Err(EngineError::Agent("model requested a tool with no name".to_string()));
                }
                let tool = self
                    .tools
                    .find(&call.name)
                    .ok_or_else(|| EngineError::Agent(format!("unknown tool '{}'", call.name)))?;
                let args = ToolArgs::decode(&call.name, &call.arguments)?;
                planned.push((call, tool, args));
            }

            progress.enter(AgentState::ToolCall);
            for (call, _, args) in &planned {
                progress.emit(AgentEvent::ToolStart {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    input: args.query.clone(),
                });
            }
            debug!(iteration, calls = planned.len(), "running tool calls");

            let results = join_all(planned.iter().map(|(_, tool, args)| tool.invoke(args))).await;

            progress.enter(AgentState::ToolResult);
            messages.push(ChatMessage::assistant_tool_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            for ((call, _, args), result) in planned.iter().zip(results) {
                let (output, failed) = match result {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!(tool = %call.name, "tool call failed: {}", e);
                        (tool_failure_notice(&call.name, &e.to_string()), true)
                    }
                };
                progress.emit(AgentEvent::ToolEnd {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output: output.clone(),
                    failed,
                });
                messages.push(ChatMessage::tool_result(call.id.clone(), output.clone()));
                scratchpad.push(ScratchpadEntry {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    query: args.query.clone(),
                    output,
                    failed,
                });
            }
        }

        Err(EngineError::Agent(format!(
            "no answer after {} iterations",
            self.max_iterations
        )))
    }
}
