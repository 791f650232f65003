use serde::{Deserialize, Serialize};

/// Tunables for the whole orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Model id used for chat and completion calls.
    #[serde(default = "default_model")]
    pub model: String,
    /// Model id used for embedding calls.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Deadline for a single outbound provider call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Held-turn count that triggers summarization.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    #[serde(default)]
    pub retriever: RetrieverConfig,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_embed_model() -> String {
    "embedding-001".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_summary_threshold() -> usize {
    8
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            embed_model: default_embed_model(),
            request_timeout_ms: default_request_timeout_ms(),
            summary_threshold: default_summary_threshold(),
            retriever: RetrieverConfig::default(),
        }
    }
}

/// Tunables for the tiered retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// How many hits to pull per search stage.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hits farther than this are discarded (1 − cosine similarity).
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
    /// Whether a still-uncertain answer may escalate to web search.
    #[serde(default = "default_web_escalation")]
    pub web_escalation: bool,
}

fn default_top_k() -> usize {
    10
}

fn default_distance_threshold() -> f32 {
    0.5
}

fn default_web_escalation() -> bool {
    true
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            distance_threshold: default_distance_threshold(),
            web_escalation: default_web_escalation(),
        }
    }
}
