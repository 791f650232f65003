//! Tool-calling dispatch: one round-trip per user turn.
//!
//! The model's first reply is a dispatch signal — plain text goes straight
//! back to the user, tool calls are executed (concurrently when independent)
//! and folded into a second, final generation pass. The second reply is never
//! allowed to start another round: any tool calls in it are flattened to text,
//! which guarantees termination.

use std::sync::Arc;

use futures::future::join_all;

use crate::error::LoreResult;
use crate::gateway::GenerationGateway;
use crate::tool::{ToolKind, ToolResponse, Toolbox};
use crate::types::*;

pub struct Dispatcher {
    gateway: Arc<GenerationGateway>,
    toolbox: Arc<Toolbox>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<GenerationGateway>, toolbox: Arc<Toolbox>) -> Self {
        Self { gateway, toolbox }
    }

    /// Answer one user turn given its conversation context.
    pub async fn respond(
        &self,
        query: &str,
        caller: &CallerContext,
        context: Vec<Message>,
        system_prompt: &str,
    ) -> LoreResult<String> {
        let catalog = ToolKind::catalog();
        let mut messages = context;
        messages.push(Message::user(format!("{}: {query}", caller.display_name)));

        let first = self
            .gateway
            .chat(&messages, &catalog, Some(system_prompt))
            .await?;

        if !first.has_tool_calls() {
            return Ok(first.text_content());
        }

        let calls: Vec<(String, String, serde_json::Value)> = first
            .tool_calls()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some((id.clone(), name.clone(), arguments.clone())),
                _ => None,
            })
            .collect();

        // All requested tools run concurrently; join_all keeps call order
        let executions = calls.iter().map(|(_, name, args)| async move {
            match ToolKind::from_name(name) {
                Some(kind) => self.toolbox.execute(caller, kind, args).await,
                None => ToolResponse::failure(format!("Unknown tool: {name}")),
            }
        });
        let results: Vec<ToolResponse> = join_all(executions).await;

        messages.push(first);
        for ((id, _, _), response) in calls.iter().zip(&results) {
            messages.push(Message::tool_result(
                id.clone(),
                response.render(),
                !response.success,
            ));
        }

        // Final pass: no tool schema, so the round cannot extend itself
        let second = self.gateway.chat(&messages, &[], Some(system_prompt)).await?;
        let text = second.text_content();
        if text.trim().is_empty() {
            tracing::warn!("final pass produced no text, falling back to tool results");
            return Ok(fallback_text(&results));
        }
        Ok(text)
    }
}

/// Last-resort reply assembled from the tool results themselves.
fn fallback_text(results: &[ToolResponse]) -> String {
    let parts: Vec<String> = results
        .iter()
        .filter_map(|r| r.answer.clone().or_else(|| r.message.clone()))
        .collect();
    if parts.is_empty() {
        "I couldn't complete that request.".into()
    } else {
        parts.join("\n")
    }
}
