//! One-or-two sentence summaries of chat transcripts.

use futures_util::future::join_all;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::llm::{ChatMessage, ChatModel};
use crate::prompts::{summary_user_message, SUMMARY_SYSTEM_PROMPT};

#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn summarize(&self, history: &str) -> EngineResult<String> {
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(summary_user_message(history)),
        ];
        let reply = self.model.complete(&messages, &[], None).await?;
        Ok(reply.content.trim().to_string())
    }

    /// One result per history, in input order. The calls run concurrently and
    /// a failed one does not cancel the rest.
    pub async fn summarize_all(&self, histories: &[String]) -> Vec<EngineResult<String>> {
        join_all(histories.iter().map(|h| self.summarize(h))).await
    }
}
