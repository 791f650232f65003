//! Rotating pool of provider credentials.
//!
//! The pool is plain state — rotation is an explicit method call, never a getter
//! side effect. Callers that share a pool across tasks wrap it in a mutex; the
//! [`GenerationGateway`](crate::gateway::GenerationGateway) does exactly that.
//! Interleaved rotations under contention may cost extra retries but the index
//! is always valid modulo the pool length.

use crate::error::{LoreError, LoreResult};

/// Ordered list of opaque provider secrets with a current-index pointer.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Vec<String>,
    index: usize,
}

impl CredentialPool {
    /// Build a pool from a non-empty key list.
    pub fn new(keys: Vec<String>) -> LoreResult<Self> {
        if keys.is_empty() {
            return Err(LoreError::CredentialsExhausted);
        }
        Ok(Self { keys, index: 0 })
    }

    /// The active credential. Fails only when the pool has been emptied by eviction.
    pub fn current(&self) -> LoreResult<&str> {
        self.keys
            .get(self.index)
            .map(String::as_str)
            .ok_or(LoreError::CredentialsExhausted)
    }

    /// Advance to the next credential, wrapping.
    pub fn rotate(&mut self) {
        if !self.keys.is_empty() {
            self.index = (self.index + 1) % self.keys.len();
        }
    }

    /// Remove a permanently invalid credential and re-clamp the index.
    pub fn evict_current(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        self.keys.remove(self.index);
        if !self.keys.is_empty() {
            self.index %= self.keys.len();
        } else {
            self.index = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
