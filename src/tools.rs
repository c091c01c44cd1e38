//! Retrieval tools exposed to the agent.
//!
//! Both tools wrap the same [`ParentChildRetriever`] and differ only in
//! name, description, and `k`:
//!
//! | Tool | Kind | k |
//! |------|------|---|
//! | `personal_testimony_retriever` | [`ToolKind::TargetedRetrieval`] | `retrieval.targeted_k` (1) |
//! | `short_answer_retriever` | [`ToolKind::BroadRetrieval`] | `retrieval.broad_k` (4) |
//!
//! The set is closed: [`ToolRegistry`] holds [`RetrievalTool`] values and the
//! agent dispatches by name through [`ToolRegistry::find`].

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{EngineError, EngineResult};
use crate::llm::ToolSpec;
use crate::models::Document;
use crate::prompts::{
    BROAD_TOOL_DESCRIPTION, BROAD_TOOL_NAME, NO_DOCUMENTS, TARGETED_TOOL_DESCRIPTION,
    TARGETED_TOOL_NAME,
};
use crate::retriever::ParentChildRetriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Few, whole-testimony results about a named individual.
    TargetedRetrieval,
    /// Several excerpts across survivors for general questions.
    BroadRetrieval,
}

/// Decoded tool-call arguments. Both tools take a single query string.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolArgs {
    pub query: String,
}

impl ToolArgs {
    /// Parse the model's raw JSON arguments. Malformed input fails the turn.
    pub fn decode(tool: &str, raw: &str) -> EngineResult<Self> {
        let raw = if raw.trim().is_empty() { "{}" } else { raw };
        serde_json::from_str(raw).map_err(|e| {
            EngineError::Agent(format!("malformed arguments for tool '{}': {}", tool, e))
        })
    }
}

#[derive(Clone)]
pub struct RetrievalTool {
    kind: ToolKind,
    k: usize,
    retriever: Arc<ParentChildRetriever>,
}

impl RetrievalTool {
    pub fn new(kind: ToolKind, k: usize, retriever: Arc<ParentChildRetriever>) -> Self {
        Self { kind, k, retriever }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            ToolKind::TargetedRetrieval => TARGETED_TOOL_NAME,
            ToolKind::BroadRetrieval => BROAD_TOOL_NAME,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.kind {
            ToolKind::TargetedRetrieval => TARGETED_TOOL_DESCRIPTION,
            ToolKind::BroadRetrieval => BROAD_TOOL_DESCRIPTION,
        }
    }

    pub fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "query to look up in retriever"
                }
            },
            "required": ["query"]
        })
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Retrieve and format documents for the model.
    pub async fn invoke(&self, args: &ToolArgs) -> EngineResult<String> {
        let documents = self
            .retriever
            .retrieve(&args.query, self.k)
            .await
            .map_err(|e| EngineError::ToolInvocation {
                tool: self.name().to_string(),
                message: e.to_string(),
            })?;
        Ok(format_documents(&documents))
    }
}

/// Renders documents as numbered plain-text blocks.
pub fn format_documents(documents: &[Document]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS.to_string();
    }
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("--- Document {} ---\n{}", i + 1, doc.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Name-indexed table of the tools offered to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RetrievalTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The targeted and broad retrieval tools over one retriever.
    pub fn retrieval(retriever: Arc<ParentChildRetriever>, config: &RetrievalConfig) -> Self {
        let mut registry = Self::new();
        registry.register(RetrievalTool::new(
            ToolKind::TargetedRetrieval,
            config.targeted_k,
            retriever.clone(),
        ));
        registry.register(RetrievalTool::new(
            ToolKind::BroadRetrieval,
            config.broad_k,
            retriever,
        ));
        registry
    }

    /// Registers `tool`, replacing any tool with the same name.
    pub fn register(&mut self, tool: RetrievalTool) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[RetrievalTool] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&RetrievalTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(RetrievalTool::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
