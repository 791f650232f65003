use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoreError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider rate limited: {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Retries exhausted: tried {attempts} credentials")]
    RetriesExhausted { attempts: usize },

    #[error("Credential pool is empty")]
    CredentialsExhausted,

    #[error("Malformed model output while {context}: {raw}")]
    MalformedOutput { context: String, raw: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Permission denied: tool={tool_name}, caller={caller}")]
    PermissionDenied { tool_name: String, caller: String },

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Knowledge entry not found: {0}")]
    EntryNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LoreError {
    /// Whether the gateway should rotate credentials and retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoreError::RateLimited { .. } | LoreError::Timeout { .. }
        )
    }
}

pub type LoreResult<T> = Result<T, LoreError>;
