//! # lore-core
//!
//! Conversational RAG orchestrator for game-knowledge assistants — the engine
//! that decides whether to answer directly, search the knowledge base, fall
//! back to web search, or update persistent knowledge and memory, then
//! produces the final reply.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lore_core::config::OrchestratorConfig;
//! use lore_core::credential::CredentialPool;
//! use lore_core::gateway::GenerationGateway;
//! use lore_core::provider::GeminiProvider;
//!
//! let config = OrchestratorConfig::default();
//! let pool = CredentialPool::new(vec!["key-1".into(), "key-2".into()]).unwrap();
//! let gateway = Arc::new(GenerationGateway::new(
//!     Arc::new(GeminiProvider::new()),
//!     pool,
//!     &config.model,
//!     &config.embed_model,
//!     Duration::from_millis(config.request_timeout_ms),
//! ));
//! // Wire the gateway into ConversationStore, TieredRetriever, Toolbox,
//! // Dispatcher, and Orchestrator — see each module's docs.
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Core types: `Message`, `ContentBlock`, knowledge and memory entries |
//! | [`error`] | `LoreError` taxonomy: rate limits, timeouts, malformed output, permissions |
//! | [`config`] | Serde-deserializable tunables with sensible defaults |
//! | [`credential`] | Rotating credential pool with explicit rotation and eviction |
//! | [`provider`] | Provider seam + Gemini implementation; the only network boundary |
//! | [`gateway`] | Completion/chat/embedding with credential rotation and bounded timeouts |
//! | [`conversation`] | Bounded turn window with a non-blocking rolling summary |
//! | [`memory`] | Per-user memory store and the fail-open relevance filter |
//! | [`knowledge`] | Knowledge store seam + in-memory cosine-distance implementation |
//! | [`retriever`] | Tiered search: precise → broad → focused document → web fallback |
//! | [`tool`] | Closed tool catalog with per-tool preconditions |
//! | [`dispatch`] | Single-round tool dispatch with concurrent execution |
//! | [`research`] | Step-plan decomposition and iteration-aware execution |
//! | [`orchestrator`] | The request flow the host platform calls into |
//!
//! ## Retrieval: the core protocol
//!
//! Single-shot vector search is precision-limited over a small curated
//! knowledge base, so [`retriever`] runs a staged protocol instead: the model
//! expands the query into precise keywords, escalates to broader ones on a
//! miss, synthesizes an answer strictly from retrieved context, and signals
//! its own confidence — a sentinel for "nothing here", a marker for "unsure".
//! Unsure answers get a focused single-document pass and, when permitted, a
//! web-search escalation. The model never answers from thin air.

pub mod config;
pub mod conversation;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod research;
pub mod retriever;
pub mod tool;
pub mod types;

pub use error::{LoreError, LoreResult};
pub use types::*;
