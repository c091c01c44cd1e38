//! Application context: every long-lived client, built once.
//!
//! [`AppContext::from_config`] picks a backend per storage concern:
//!
//! | Concern | `memory` | `sqlite` | other |
//! |---------|----------|----------|-------|
//! | vectors (`storage.vector`) | [`MemoryVectorIndex`] | [`SqliteVectorIndex`] | `upstash`: [`UpstashVectorIndex`] |
//! | parents (`storage.documents`) | [`MemoryDocumentStore`] | [`SqliteDocumentStore`] | `filesystem`: [`FsDocumentStore`] |
//! | history + shares (`storage.history`) | [`MemoryListStore`] / [`MemoryKvStore`] | [`SqliteListStore`] / [`SqliteKvStore`] | `upstash`: [`UpstashRedis`] |
//!
//! The SQLite pool is opened (and migrated) only when some concern uses it.
//! Tests use [`AppContext::assemble`] to inject their own components.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::agent::ConversationAgent;
use crate::auth::TokenVerifier;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::history::SessionHistoryStore;
use crate::llm::{create_chat_model, ChatModel};
use crate::migrate;
use crate::retriever::ParentChildRetriever;
use crate::share::ShareStore;
use crate::store::{
    DocumentStore, FsDocumentStore, KvStore, ListStore, MemoryDocumentStore, MemoryKvStore,
    MemoryListStore, MemoryVectorIndex, SqliteDocumentStore, SqliteKvStore, SqliteListStore,
    SqliteVectorIndex, UpstashRedis, UpstashVectorIndex, VectorIndex,
};
use crate::summary::Summarizer;
use crate::tools::ToolRegistry;

/// The pluggable pieces of a context.
pub struct Components {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub documents: Arc<dyn DocumentStore>,
    pub lists: Arc<dyn ListStore>,
    pub kv: Arc<dyn KvStore>,
    pub model: Arc<dyn ChatModel>,
}

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub retriever: Arc<ParentChildRetriever>,
    pub agent: Arc<ConversationAgent>,
    pub history: SessionHistoryStore,
    pub shares: ShareStore,
    pub summarizer: Summarizer,
    /// `None` when no public key is configured; authenticated routes then fail.
    pub verifier: Option<Arc<TokenVerifier>>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage = &config.storage;
        let needs_sqlite =
            storage.vector == "sqlite" || storage.documents == "sqlite" || storage.history == "sqlite";
        let pool = if needs_sqlite {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            Some(pool)
        } else {
            None
        };

        let index = build_index(&config, pool.as_ref())?;
        let documents = build_documents(&config, pool.as_ref())?;
        let (lists, kv) = build_history(&config, pool.as_ref())?;

        let components = Components {
            embedder: Arc::from(create_embedder(&config.embedding)?),
            index,
            documents,
            lists,
            kv,
            model: Arc::from(create_chat_model(&config.llm)?),
        };
        let verifier = TokenVerifier::from_config(&config.auth)?;
        if verifier.is_none() {
            tracing::warn!(
                env = %config.auth.public_key_env,
                "no JWT public key configured; authenticated routes will reject every request"
            );
        }
        Self::assemble(config, components, verifier)
    }

    /// Wires a context from explicit components.
    pub fn assemble(
        config: Config,
        components: Components,
        verifier: Option<TokenVerifier>,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        let retriever = Arc::new(ParentChildRetriever::new(
            chunker,
            components.embedder,
            components.index,
            components.documents,
            config.embedding.batch_size,
        ));
        let history = SessionHistoryStore::new(components.lists);
        let tools = ToolRegistry::retrieval(retriever.clone(), &config.retrieval);

        let mut agent = ConversationAgent::new(components.model.clone(), tools, history.clone())
            .with_max_iterations(config.agent.max_iterations);
        if let Some(prompt) = &config.agent.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }

        Ok(Self {
            retriever,
            agent: Arc::new(agent),
            history,
            shares: ShareStore::new(components.kv),
            summarizer: Summarizer::new(components.model),
            verifier: verifier.map(Arc::new),
            config: Arc::new(config),
        })
    }
}

fn require_pool(pool: Option<&SqlitePool>) -> Result<SqlitePool> {
    match pool {
        Some(pool) => Ok(pool.clone()),
        None => bail!("SQLite backend requested but no database pool was opened"),
    }
}

fn build_index(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn VectorIndex>> {
    let storage = &config.storage;
    let index: Arc<dyn VectorIndex> = match storage.vector.as_str() {
        "memory" => Arc::new(MemoryVectorIndex::new()),
        "sqlite" => Arc::new(SqliteVectorIndex::new(
            require_pool(pool)?,
            storage.upstash_vector.namespace.clone(),
        )),
        "upstash" => Arc::new(UpstashVectorIndex::from_config(&storage.upstash_vector)?),
        other => bail!("Unknown vector backend: {}", other),
    };
    Ok(index)
}

fn build_documents(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn DocumentStore>> {
    let storage = &config.storage;
    let documents: Arc<dyn DocumentStore> = match storage.documents.as_str() {
        "memory" => Arc::new(MemoryDocumentStore::new()),
        "sqlite" => Arc::new(SqliteDocumentStore::new(require_pool(pool)?)),
        "filesystem" => Arc::new(FsDocumentStore::new(storage.documents_dir.clone())?),
        other => bail!("Unknown documents backend: {}", other),
    };
    Ok(documents)
}

fn build_history(
    config: &Config,
    pool: Option<&SqlitePool>,
) -> Result<(Arc<dyn ListStore>, Arc<dyn KvStore>)> {
    let storage = &config.storage;
    let lists: Arc<dyn ListStore>;
    let kv: Arc<dyn KvStore>;
    match storage.history.as_str() {
        "memory" => {
            lists = Arc::new(MemoryListStore::new());
            kv = Arc::new(MemoryKvStore::new());
        }
        "sqlite" => {
            let pool = require_pool(pool)?;
            lists = Arc::new(SqliteListStore::new(pool.clone()));
            kv = Arc::new(SqliteKvStore::new(pool));
        }
        "upstash" => {
            let redis = Arc::new(UpstashRedis::from_config(&storage.upstash_redis)?);
            lists = redis.clone();
            kv = redis;
        }
        other => bail!("Unknown history backend: {}", other),
    }
    Ok((lists, kv))
}
