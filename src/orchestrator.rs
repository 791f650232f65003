//! Top-level request flow: context in, dispatch, exchange appended.

use std::sync::Arc;

use crate::conversation::ConversationStore;
use crate::dispatch::Dispatcher;
use crate::error::LoreResult;
use crate::memory::{MemoryStore, RelevanceFilter};
use crate::types::{CallerContext, Role};

/// An inbound event from the host chat platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub text: String,
    /// The host sets this when the user explicitly asked for a web lookup.
    pub web_intent: bool,
}

pub struct Orchestrator {
    conversations: Arc<ConversationStore>,
    dispatcher: Dispatcher,
    memory: Arc<dyn MemoryStore>,
    relevance: RelevanceFilter,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(
        conversations: Arc<ConversationStore>,
        dispatcher: Dispatcher,
        memory: Arc<dyn MemoryStore>,
        relevance: RelevanceFilter,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            conversations,
            dispatcher,
            memory,
            relevance,
            system_prompt: system_prompt.into(),
        }
    }

    /// Handle one inbound message and produce the reply text.
    ///
    /// The reply is a single logical string; splitting it to fit platform
    /// message limits is the host's concern.
    pub async fn handle_message(&self, inbound: &InboundMessage) -> LoreResult<String> {
        let context = self.conversations.context(&inbound.conversation_id);

        let mut caller = CallerContext::new(&inbound.author_id, &inbound.author_display_name);
        if inbound.web_intent {
            caller = caller.with_web_intent();
        }

        let system_prompt = self.personalized_prompt(inbound).await;
        let reply = self
            .dispatcher
            .respond(&inbound.text, &caller, context, &system_prompt)
            .await?;

        self.conversations.append(
            &inbound.conversation_id,
            Role::User,
            &inbound.author_display_name,
            &inbound.text,
        );
        self.conversations
            .append(&inbound.conversation_id, Role::Assistant, "assistant", &reply);

        Ok(reply)
    }

    /// Administrative reset of one conversation.
    pub fn clear_conversation(&self, conversation_id: &str) {
        self.conversations.clear(conversation_id);
    }

    /// Base system prompt extended with the memories relevant to this query.
    /// Memory lookups fail open — personalization is never worth blocking a reply.
    async fn personalized_prompt(&self, inbound: &InboundMessage) -> String {
        let memories = match self.memory.list_by_user(&inbound.author_id).await {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(error = %e, "memory lookup failed, continuing without");
                Vec::new()
            }
        };
        if memories.is_empty() {
            return self.system_prompt.clone();
        }

        let relevant = self.relevance.filter(&inbound.text, &memories).await;
        if relevant.is_empty() {
            return self.system_prompt.clone();
        }

        let facts: Vec<String> = relevant
            .iter()
            .map(|m| format!("- {}: {}", m.key, m.value))
            .collect();
        format!(
            "{}\n\nKnown facts about {}:\n{}",
            self.system_prompt,
            inbound.author_display_name,
            facts.join("\n")
        )
    }
}
