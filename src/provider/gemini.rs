use reqwest::Client;
use serde_json::json;

use crate::error::{LoreError, LoreResult};
use crate::types::*;

use super::traits::Provider;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn build_chat_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| self.message_to_api(m))
            .collect();

        let mut body = json!({ "contents": contents });

        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        if !tools.is_empty() {
            let declarations: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        body
    }

    fn message_to_api(&self, msg: &Message) -> serde_json::Value {
        let role = match msg.role {
            Role::Assistant => "model",
            // Tool results travel back as user-role function responses
            Role::User | Role::Tool | Role::System => "user",
        };

        let parts: Vec<serde_json::Value> = msg
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({ "text": text }),
                ContentBlock::ToolCall {
                    name, arguments, ..
                } => {
                    json!({
                        "functionCall": { "name": name, "args": arguments }
                    })
                }
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => {
                    // Call ids are "<name>-<index>"; the API wants the name back
                    let name = tool_call_id
                        .rsplit_once('-')
                        .map(|(name, _)| name)
                        .unwrap_or(tool_call_id.as_str());
                    json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "content": content, "is_error": is_error }
                        }
                    })
                }
            })
            .collect();

        json!({ "role": role, "parts": parts })
    }

    fn parse_candidate(&self, data: &serde_json::Value) -> LoreResult<Message> {
        let parts = data
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LoreError::MalformedOutput {
                context: "reading chat candidate".into(),
                raw: data.to_string(),
            })?;

        let mut blocks: Vec<ContentBlock> = Vec::new();
        let mut call_index = 0usize;
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                blocks.push(ContentBlock::text(text));
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let args = call.get("args").cloned().unwrap_or(json!({}));
                blocks.push(ContentBlock::tool_call(
                    format!("{name}-{call_index}"),
                    name,
                    args,
                ));
                call_index += 1;
            }
        }

        if blocks.is_empty() {
            return Err(LoreError::MalformedOutput {
                context: "reading chat candidate".into(),
                raw: data.to_string(),
            });
        }

        Ok(Message::new(Role::Assistant, blocks))
    }

    async fn check_status(&self, response: reqwest::Response) -> LoreResult<serde_json::Value> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(LoreError::RateLimited {
                    provider: "gemini".into(),
                    retry_after_ms: 5000,
                });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LoreError::Provider(format!("Gemini auth failed: {body}")));
            }
            return Err(LoreError::Provider(format!(
                "Gemini API error {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        model: &str,
        api_key: &str,
    ) -> LoreResult<Message> {
        let body = self.build_chat_body(messages, system, tools);
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let data = self.check_status(response).await?;
        self.parse_candidate(&data)
    }

    async fn embed(&self, text: &str, model: &str, api_key: &str) -> LoreResult<Vec<f32>> {
        let url = format!("{}/v1beta/models/{model}:embedContent", self.base_url);
        let body = json!({ "content": { "parts": [{ "text": text }] } });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let data = self.check_status(response).await?;
        let values = data
            .pointer("/embedding/values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LoreError::MalformedOutput {
                context: "reading embedding".into(),
                raw: data.to_string(),
            })?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }
}
