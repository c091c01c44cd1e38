//! Error taxonomy shared by every component of the answer engine.
//!
//! Library operations return [`EngineResult`]; the HTTP layer maps each
//! variant onto a status code and a machine-readable error code via
//! [`EngineError::status_code`] and [`EngineError::code`].
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `InvalidIdentifier` | 400 | `bad_request` |
//! | `Auth` | 403 | `forbidden` |
//! | `NotFound` | 404 | `not_found` |
//! | `Storage` | 503 | `storage_unavailable` |
//! | `Embedding` | 502 | `embedding_failed` |
//! | `Model` | 502 | `model_error` |
//! | `ToolInvocation` | 500 | `tool_error` |
//! | `Agent` | 500 | `agent_error` |
//! | `Internal` | 500 | `internal` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },
    #[error("agent error: {0}")]
    Agent(String),
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidIdentifier(_) => 400,
            EngineError::Auth(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Storage(_) => 503,
            EngineError::Embedding(_) | EngineError::Model(_) => 502,
            EngineError::ToolInvocation { .. } | EngineError::Agent(_) | EngineError::Internal(_) => {
                500
            }
        }
    }

    /// Machine-readable code used in `{"error": {"code", "message"}}` bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidIdentifier(_) => "bad_request",
            EngineError::Auth(_) => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::Storage(_) => "storage_unavailable",
            EngineError::Embedding(_) => "embedding_failed",
            EngineError::Model(_) => "model_error",
            EngineError::ToolInvocation { .. } => "tool_error",
            EngineError::Agent(_) => "agent_error",
            EngineError::Internal(_) => "internal",
        }
    }

    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
