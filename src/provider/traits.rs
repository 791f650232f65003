use crate::error::LoreResult;
use crate::types::*;

/// Core provider trait — abstracts generation API communication.
///
/// Any backend exposing chat/completion/embedding/tool-calling semantics can
/// implement this; the rest of the crate only talks to the
/// [`GenerationGateway`](crate::gateway::GenerationGateway), which wraps one of
/// these together with a credential pool.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name used in error messages and logs.
    fn name(&self) -> &str;

    /// One chat round. Returns either plain text or a message carrying tool calls.
    async fn chat(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        model: &str,
        api_key: &str,
    ) -> LoreResult<Message>;

    /// Embed a text into a vector.
    async fn embed(&self, text: &str, model: &str, api_key: &str) -> LoreResult<Vec<f32>>;
}
