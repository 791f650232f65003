//! The single choke point for model calls.
//!
//! Every higher component asks the gateway for completion, chat, or embedding.
//! On a rate-limit or timeout the gateway rotates the credential pool and
//! retries the same call, bounded by the pool size; any other provider error
//! surfaces immediately.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::credential::CredentialPool;
use crate::error::{LoreError, LoreResult};
use crate::provider::Provider;
use crate::types::*;

pub struct GenerationGateway {
    provider: Arc<dyn Provider>,
    pool: Mutex<CredentialPool>,
    model: String,
    embed_model: String,
    timeout: Duration,
}

impl GenerationGateway {
    pub fn new(
        provider: Arc<dyn Provider>,
        pool: CredentialPool,
        model: impl Into<String>,
        embed_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            pool: Mutex::new(pool),
            model: model.into(),
            embed_model: embed_model.into(),
            timeout,
        }
    }

    /// Single-prompt completion: one user message, no tools, text out.
    pub async fn complete(&self, prompt: &str) -> LoreResult<String> {
        let message = Message::user(prompt);
        let response = self.chat(&[message], &[], None).await?;
        Ok(response.text_content())
    }

    /// One chat round with optional tool schema and system prompt.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        system: Option<&str>,
    ) -> LoreResult<Message> {
        let attempts = self.pool_len()?;
        for _ in 0..attempts {
            let key = self.current_key()?;
            let call = self
                .provider
                .chat(messages, system, tools, &self.model, &key);
            match self.bounded(call).await {
                Ok(msg) => return Ok(msg),
                Err(e) if e.is_retryable() => self.rotate_on(&e),
                Err(e) => return Err(e),
            }
        }
        Err(LoreError::RetriesExhausted { attempts })
    }

    /// Embed a text into a vector.
    pub async fn embed(&self, text: &str) -> LoreResult<Vec<f32>> {
        let attempts = self.pool_len()?;
        for _ in 0..attempts {
            let key = self.current_key()?;
            let call = self.provider.embed(text, &self.embed_model, &key);
            match self.bounded(call).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_retryable() => self.rotate_on(&e),
                Err(e) => return Err(e),
            }
        }
        Err(LoreError::RetriesExhausted { attempts })
    }

    /// Drop the active credential permanently (e.g. a revoked key).
    pub fn evict_current(&self) {
        let mut pool = self.pool.lock().expect("credential pool lock poisoned");
        tracing::warn!(provider = self.provider.name(), "evicting credential");
        pool.evict_current();
    }

    fn pool_len(&self) -> LoreResult<usize> {
        let pool = self.pool.lock().expect("credential pool lock poisoned");
        if pool.is_empty() {
            return Err(LoreError::CredentialsExhausted);
        }
        Ok(pool.len())
    }

    fn current_key(&self) -> LoreResult<String> {
        let pool = self.pool.lock().expect("credential pool lock poisoned");
        pool.current().map(str::to_string)
    }

    fn rotate_on(&self, cause: &LoreError) {
        tracing::warn!(
            provider = self.provider.name(),
            %cause,
            "rotating credential"
        );
        let mut pool = self.pool.lock().expect("credential pool lock poisoned");
        pool.rotate();
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = LoreResult<T>>,
    ) -> LoreResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LoreError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
