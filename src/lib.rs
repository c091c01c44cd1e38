//! # Holocaust Answer Engine
//!
//! A retrieval-augmented conversational backend over a corpus of survivor
//! testimonies.
//!
//! Transcripts are split into large *parent* passages and small *child*
//! segments; children are embedded and indexed, parents are stored whole.
//! A query matches children and returns their parents, so answers cite full
//! context. A tool-using agent decides when to retrieve, keeps per-user
//! conversation history, and streams its answer over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────────────┐   ┌────────────────┐
//! │  Corpus    │──▶│ ParentChildRetriever │──▶│ VectorIndex    │
//! │  (ingest)  │   │ chunk + embed        │   │ DocumentStore  │
//! └────────────┘   └──────────┬──────────┘   └────────────────┘
//!                             │ tools
//!                  ┌──────────▼──────────┐   ┌────────────────┐
//!                  │ ConversationAgent   │──▶│ History/Shares │
//!                  └──────────┬──────────┘   └────────────────┘
//!                             ▼
//!                  ┌─────────────────────┐
//!                  │ HTTP (axum, SSE)    │
//!                  └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hae ingest --dry-run                 # count documents and segments
//! hae ingest                           # embed and index the corpus
//! hae retrieve "life in the ghetto"    # inspect retrieval
//! hae ask "Where was Rita born?" --user u1 --conversation c1
//! hae serve                            # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector, document, list, and key-value backends |
//! | [`retriever`] | Parent/child indexing and retrieval |
//! | [`tools`] | Retrieval tools offered to the agent |
//! | [`llm`] | Streaming chat-model client |
//! | [`agent`] | Tool-using conversation loop |
//! | [`history`] | Per-conversation chat history |
//! | [`share`] | Public/private conversation flags |
//! | [`summary`] | Transcript summaries |
//! | [`auth`] | JWT verification |
//! | [`context`] | Client wiring |
//! | [`ingest`] | Corpus scanning and cleaning |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod auth;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod retriever;
pub mod server;
pub mod share;
pub mod store;
pub mod summary;
pub mod tools;
