//! Long-term per-user memory and the relevance filter that decides which
//! memories accompany a query.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::LoreResult;
use crate::gateway::GenerationGateway;
use crate::types::MemoryEntry;

/// Persistent per-user memory. The orchestrator reads and writes through this
/// interface and never caches entries beyond a single request.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or overwrite the entry for (user_id, key). Last write wins.
    async fn upsert(&self, entry: MemoryEntry) -> LoreResult<()>;

    /// All entries for a user, in insertion order.
    async fn list_by_user(&self, user_id: &str) -> LoreResult<Vec<MemoryEntry>>;

    async fn delete(&self, user_id: &str, key: &str) -> LoreResult<()>;
}

/// Process-lifetime memory store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: DashMap<String, Vec<MemoryEntry>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn upsert(&self, entry: MemoryEntry) -> LoreResult<()> {
        let mut user_entries = self.entries.entry(entry.user_id.clone()).or_default();
        if let Some(existing) = user_entries.iter_mut().find(|e| e.key == entry.key) {
            existing.value = entry.value;
        } else {
            user_entries.push(entry);
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> LoreResult<Vec<MemoryEntry>> {
        Ok(self
            .entries
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, key: &str) -> LoreResult<()> {
        if let Some(mut user_entries) = self.entries.get_mut(user_id) {
            user_entries.retain(|e| e.key != key);
        }
        Ok(())
    }
}

/// Judges which stored memories matter for a query.
///
/// A single classification call asks the model to reason about indirect
/// relevance (a stored playstyle preference can imply a build question).
/// Any failure fails open: every entry comes back, in original order.
pub struct RelevanceFilter {
    gateway: Arc<GenerationGateway>,
}

impl RelevanceFilter {
    pub fn new(gateway: Arc<GenerationGateway>) -> Self {
        Self { gateway }
    }

    pub async fn filter(&self, query: &str, entries: &[MemoryEntry]) -> Vec<MemoryEntry> {
        if entries.is_empty() {
            return Vec::new();
        }

        let prompt = build_relevance_prompt(query, entries);
        let reply = match self.gateway.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "relevance classification failed, keeping all memories");
                return entries.to_vec();
            }
        };

        match parse_relevant_keys(&reply) {
            Some(keys) => entries
                .iter()
                .filter(|e| keys.iter().any(|k| k == &e.key))
                .cloned()
                .collect(),
            None => {
                tracing::warn!(raw = %reply, "unparsable relevance reply, keeping all memories");
                entries.to_vec()
            }
        }
    }
}

fn build_relevance_prompt(query: &str, entries: &[MemoryEntry]) -> String {
    let listing: Vec<String> = entries
        .iter()
        .map(|e| format!("- {}: {}", e.key, e.value))
        .collect();
    format!(
        "A player asked: \"{query}\"\n\n\
         Stored facts about this player:\n{}\n\n\
         Think step by step about which facts are relevant, including indirectly \
         (a preferred weapon implies interest in builds for it). Then reply with a \
         JSON array of objects {{\"memory\": \"<key>\", \"reason\": \"<why>\"}} \
         containing only the relevant facts. Reply with the JSON array alone.",
        listing.join("\n")
    )
}

/// Extract the selected memory keys from the classification reply.
/// Returns `None` when the reply cannot be parsed.
fn parse_relevant_keys(reply: &str) -> Option<Vec<String>> {
    let json = crate::tool::strip_code_fences(reply);
    let parsed: serde_json::Value = serde_json::from_str(json).ok()?;
    let items = parsed.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.get("memory")?.as_str().map(str::to_string))
            .collect(),
    )
}
