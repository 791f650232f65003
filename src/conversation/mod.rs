//! Per-conversation bounded message window with a rolling summary.
//!
//! Raw turns are held up to a fixed threshold; crossing it kicks off an
//! asynchronous summarization that folds the held turns into the summary
//! without blocking the caller's response path. Turns appended while a
//! summarization is in flight simply accumulate for the next trigger.

use std::sync::Arc;

use dashmap::DashMap;

use crate::gateway::GenerationGateway;
use crate::types::{ChatTurn, Message, Role};

const DEFAULT_SUMMARY: &str = "The conversation has just started.";

/// State for one conversation. Created lazily, lives for the process,
/// destroyed only by an explicit [`ConversationStore::clear`].
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub summary: String,
    pub recent: Vec<ChatTurn>,
    pub is_summarizing: bool,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            summary: DEFAULT_SUMMARY.into(),
            recent: Vec::new(),
            is_summarizing: false,
        }
    }
}

pub struct ConversationStore {
    gateway: Arc<GenerationGateway>,
    conversations: Arc<DashMap<String, ConversationState>>,
    threshold: usize,
}

impl ConversationStore {
    pub fn new(gateway: Arc<GenerationGateway>, threshold: usize) -> Self {
        Self {
            gateway,
            conversations: Arc::new(DashMap::new()),
            threshold,
        }
    }

    /// Rolling context for a conversation: the summary prefixed onto the oldest
    /// held turn, then the remaining turns. Empty when nothing is held.
    pub fn context(&self, conversation_id: &str) -> Vec<Message> {
        let Some(state) = self.conversations.get(conversation_id) else {
            return Vec::new();
        };
        if state.recent.is_empty() {
            return Vec::new();
        }

        state
            .recent
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                let rendered = render_turn(turn);
                let text = if i == 0 {
                    format!(
                        "[Conversation summary] {}\n\n{rendered}",
                        state.summary
                    )
                } else {
                    rendered
                };
                match turn.role {
                    Role::Assistant => Message::assistant(text),
                    _ => Message::user(text),
                }
            })
            .collect()
    }

    /// Push one turn. Crossing the threshold starts a fire-and-forget
    /// summarization unless one is already running for this conversation.
    pub fn append(&self, conversation_id: &str, role: Role, author: &str, text: &str) {
        let snapshot = {
            let mut state = self
                .conversations
                .entry(conversation_id.to_string())
                .or_insert_with(ConversationState::new);
            state.recent.push(ChatTurn::new(role, author, text));

            if state.recent.len() >= self.threshold && !state.is_summarizing {
                state.is_summarizing = true;
                Some((state.summary.clone(), state.recent.clone()))
            } else {
                None
            }
        };

        if let Some((summary, turns)) = snapshot {
            let gateway = Arc::clone(&self.gateway);
            let conversations = Arc::clone(&self.conversations);
            let id = conversation_id.to_string();
            tokio::spawn(async move {
                summarize(gateway, conversations, id, summary, turns).await;
            });
        }
    }

    /// Discard all state for a conversation. Calling it again is a no-op.
    pub fn clear(&self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    /// Whether a summarization is currently in flight for this conversation.
    pub fn is_summarizing(&self, conversation_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .map(|s| s.is_summarizing)
            .unwrap_or(false)
    }

    /// Current summary, for diagnostics and tests.
    pub fn summary(&self, conversation_id: &str) -> Option<String> {
        self.conversations
            .get(conversation_id)
            .map(|s| s.summary.clone())
    }

    /// Number of held turns.
    pub fn held_turns(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map(|s| s.recent.len())
            .unwrap_or(0)
    }
}

async fn summarize(
    gateway: Arc<GenerationGateway>,
    conversations: Arc<DashMap<String, ConversationState>>,
    conversation_id: String,
    summary: String,
    turns: Vec<ChatTurn>,
) {
    let prompt = build_summary_prompt(&summary, &turns);
    let result = gateway.complete(&prompt).await;

    let Some(mut state) = conversations.get_mut(&conversation_id) else {
        // Conversation was cleared mid-flight; nothing to update.
        return;
    };

    match result {
        Ok(new_summary) if !new_summary.trim().is_empty() => {
            state.summary = new_summary.trim().to_string();
            // Remove exactly what was summarized; turns appended while the
            // call was in flight stay for the next trigger.
            let n = turns.len().min(state.recent.len());
            state.recent.drain(..n);
        }
        Ok(_) => {
            tracing::warn!(conversation_id, "summarization returned empty text");
        }
        Err(e) => {
            tracing::warn!(conversation_id, error = %e, "summarization failed");
        }
    }
    state.is_summarizing = false;
}

fn render_turn(turn: &ChatTurn) -> String {
    format!("{}: {}", turn.author, turn.text)
}

fn build_summary_prompt(summary: &str, turns: &[ChatTurn]) -> String {
    let transcript: Vec<String> = turns.iter().map(render_turn).collect();
    format!(
        "Update the running summary of this conversation.\n\n\
         Previous summary:\n{summary}\n\n\
         New messages:\n{}\n\n\
         Reply with only the updated summary, keeping it under a short paragraph.",
        transcript.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialPool;
    use crate::error::{LoreError, LoreResult};
    use crate::provider::Provider;
    use crate::types::ToolDefinition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SummaryProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Provider for SummaryProvider {
        fn name(&self) -> &str {
            "summary-mock"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _system: Option<&str>,
            _tools: &[ToolDefinition],
            _model: &str,
            _key: &str,
        ) -> LoreResult<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LoreError::Provider("summarizer down".into()));
            }
            Ok(Message::assistant("They discussed weapon builds."))
        }

        async fn embed(&self, _text: &str, _model: &str, _key: &str) -> LoreResult<Vec<f32>> {
            Ok(vec![0.0])
        }
    }

    fn store_with(fail: bool) -> (Arc<ConversationStore>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(SummaryProvider {
            calls: calls.clone(),
            fail,
        });
        let gateway = Arc::new(GenerationGateway::new(
            provider,
            CredentialPool::new(vec!["k".into()]).unwrap(),
            "m",
            "e",
            Duration::from_secs(5),
        ));
        (Arc::new(ConversationStore::new(gateway, 8)), calls)
    }

    async fn wait_until_idle(store: &ConversationStore, id: &str) {
        for _ in 0..100 {
            if !store.is_summarizing(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("summarization never finished");
    }

    #[tokio::test]
    async fn context_empty_for_unknown_conversation() {
        let (store, _) = store_with(false);
        assert!(store.context("nope").is_empty());
    }

    #[tokio::test]
    async fn context_prefixes_summary_on_oldest_turn() {
        let (store, _) = store_with(false);
        store.append("c1", Role::User, "Ada", "what beats Burn?");
        store.append("c1", Role::Assistant, "bot", "Frost resists Burn.");

        let ctx = store.context("c1");
        assert_eq!(ctx.len(), 2);
        assert!(ctx[0].text_content().contains("[Conversation summary]"));
        assert!(ctx[0].text_content().contains("what beats Burn?"));
        assert!(!ctx[1].text_content().contains("[Conversation summary]"));
        assert_eq!(ctx[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn nine_appends_trigger_exactly_one_summarization() {
        let (store, calls) = store_with(false);
        for i in 0..9 {
            store.append("c1", Role::User, "Ada", &format!("message {i}"));
            // Let the spawned task run before the next append
            tokio::task::yield_now().await;
        }
        wait_until_idle(&store, "c1").await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.summary("c1").unwrap(), "They discussed weapon builds.");
        // The 8 summarized turns are gone; the 9th is still held
        assert_eq!(store.held_turns("c1"), 1);
    }

    #[tokio::test]
    async fn failed_summarization_keeps_buffer_and_summary() {
        let (store, _) = store_with(true);
        for i in 0..8 {
            store.append("c1", Role::User, "Ada", &format!("message {i}"));
        }
        wait_until_idle(&store, "c1").await;

        assert_eq!(store.summary("c1").unwrap(), DEFAULT_SUMMARY);
        assert_eq!(store.held_turns("c1"), 8);
        assert!(!store.is_summarizing("c1"));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (store, _) = store_with(false);
        store.append("c1", Role::User, "Ada", "hello");
        store.clear("c1");
        assert!(store.context("c1").is_empty());
        store.clear("c1");
        assert!(store.context("c1").is_empty());
        assert_eq!(store.held_turns("c1"), 0);
    }

    #[tokio::test]
    async fn summarization_survives_clear_race() {
        let (store, _) = store_with(false);
        for i in 0..8 {
            store.append("c1", Role::User, "Ada", &format!("message {i}"));
        }
        store.clear("c1");
        // The in-flight task finds no state and must not recreate it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.context("c1").is_empty());
        assert!(store.summary("c1").is_none());
    }
}
