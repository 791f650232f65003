//! The closed tool catalog and its executor.
//!
//! Tools are a tagged enum, not a name-keyed registry — adding a variant
//! forces every dispatch site to handle it at compile time. Each tool checks
//! its own precondition and always returns a structured [`ToolResponse`];
//! failures never escape as errors past this boundary.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{LoreError, LoreResult};
use crate::gateway::GenerationGateway;
use crate::knowledge::KnowledgeStore;
use crate::memory::MemoryStore;
use crate::retriever::{RetrievalOutcome, TieredRetriever, WebSearch};
use crate::types::*;

/// Host-supplied authorization predicate for mutation tools.
pub trait PrivilegeCheck: Send + Sync {
    fn has_elevated(&self, caller_id: &str) -> bool;
}

/// Every tool the dispatcher can offer to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SearchKnowledgeBase,
    AddLore,
    UpdateLore,
    SaveMemory,
    WebSearch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::SearchKnowledgeBase,
        ToolKind::AddLore,
        ToolKind::UpdateLore,
        ToolKind::SaveMemory,
        ToolKind::WebSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SearchKnowledgeBase => "search_knowledge_base",
            ToolKind::AddLore => "add_lore",
            ToolKind::UpdateLore => "update_lore",
            ToolKind::SaveMemory => "save_memory",
            ToolKind::WebSearch => "google_search",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            ToolKind::SearchKnowledgeBase => ToolDefinition {
                name: self.name().into(),
                description: "Search the game knowledge base for items, mechanics, lore, and guides."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "What to look up"}
                    },
                    "required": ["query"]
                }),
            },
            ToolKind::AddLore => ToolDefinition {
                name: self.name().into(),
                description: "Add new verified knowledge to the knowledge base. Moderators only."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string", "description": "The knowledge to store, as free text"},
                        "source": {"type": "string", "description": "Where this information came from"}
                    },
                    "required": ["text"]
                }),
            },
            ToolKind::UpdateLore => ToolDefinition {
                name: self.name().into(),
                description: "Update an existing knowledge base entry with new information. Moderators only."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Name of the entry to update"},
                        "text": {"type": "string", "description": "The new information"}
                    },
                    "required": ["name", "text"]
                }),
            },
            ToolKind::SaveMemory => ToolDefinition {
                name: self.name().into(),
                description: "Remember a fact about the current user for future conversations."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "string", "description": "Short label for the fact"},
                        "value": {"type": "string", "description": "The fact itself"}
                    },
                    "required": ["key", "value"]
                }),
            },
            ToolKind::WebSearch => ToolDefinition {
                name: self.name().into(),
                description: "Search the web when the user explicitly asks for information beyond the knowledge base."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "The web search query"}
                    },
                    "required": ["query"]
                }),
            },
        }
    }

    /// Schemas for every tool, in catalog order.
    pub fn catalog() -> Vec<ToolDefinition> {
        Self::ALL.iter().map(|k| k.definition()).collect()
    }
}

/// Structured result of one tool execution: exactly one per tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl ToolResponse {
    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            answer: None,
        }
    }

    pub fn ok_answer(answer: impl Into<String>) -> Self {
        Self {
            success: true,
            message: None,
            answer: Some(answer.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            answer: None,
        }
    }

    /// Wire form folded back into the model's second pass.
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"success":false}"#.into())
    }
}

/// Executes tools against the stores and collaborators they need.
pub struct Toolbox {
    gateway: Arc<GenerationGateway>,
    retriever: Arc<TieredRetriever>,
    knowledge: Arc<dyn KnowledgeStore>,
    memory: Arc<dyn MemoryStore>,
    privilege: Arc<dyn PrivilegeCheck>,
    web: Option<Arc<dyn WebSearch>>,
}

impl Toolbox {
    pub fn new(
        gateway: Arc<GenerationGateway>,
        retriever: Arc<TieredRetriever>,
        knowledge: Arc<dyn KnowledgeStore>,
        memory: Arc<dyn MemoryStore>,
        privilege: Arc<dyn PrivilegeCheck>,
        web: Option<Arc<dyn WebSearch>>,
    ) -> Self {
        Self {
            gateway,
            retriever,
            knowledge,
            memory,
            privilege,
            web,
        }
    }

    /// Run one tool call. All failure modes become `{success: false}`.
    pub async fn execute(
        &self,
        caller: &CallerContext,
        kind: ToolKind,
        args: &serde_json::Value,
    ) -> ToolResponse {
        let result = match kind {
            ToolKind::SearchKnowledgeBase => self.search(caller, args).await,
            ToolKind::AddLore => self.add_lore(caller, args).await,
            ToolKind::UpdateLore => self.update_lore(caller, args).await,
            ToolKind::SaveMemory => self.save_memory(caller, args).await,
            ToolKind::WebSearch => self.web_search(caller, args).await,
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(tool = kind.name(), error = %e, "tool execution failed");
            match e {
                LoreError::StoreUnavailable(which) => ToolResponse::failure(format!(
                    "The {which} is currently unavailable. Please try again later."
                )),
                LoreError::PermissionDenied { .. } => ToolResponse::failure(
                    "You don't have permission to modify the knowledge base.",
                ),
                LoreError::MalformedOutput { .. } => ToolResponse::failure(
                    "I couldn't process that request. Try rephrasing it.",
                ),
                _ => ToolResponse::failure("Something went wrong running that action."),
            }
        })
    }

    async fn search(
        &self,
        caller: &CallerContext,
        args: &serde_json::Value,
    ) -> LoreResult<ToolResponse> {
        let query = require_str(args, "query")?;
        match self.retriever.retrieve(query, caller.web_intent).await? {
            RetrievalOutcome::Answer { text, .. } => Ok(ToolResponse::ok_answer(text)),
            RetrievalOutcome::NothingFound { message } => Ok(ToolResponse::failure(message)),
        }
    }

    async fn add_lore(
        &self,
        caller: &CallerContext,
        args: &serde_json::Value,
    ) -> LoreResult<ToolResponse> {
        self.require_elevated(caller, ToolKind::AddLore)?;
        let text = require_str(args, "text")?;
        let source = args
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or(caller.display_name.as_str());

        let structured = self.structure_lore(text).await?;
        let name = structured
            .entity_name
            .clone()
            .unwrap_or_else(|| "Unknown entry".into());
        let category = EntryCategory::parse(structured.entity_type.as_deref().unwrap_or(""));
        let metadata = structured.into_metadata(text, source);

        let embedding = self.gateway.embed(&format!("{name} {text}")).await?;
        let entry = KnowledgeEntry::new(&name, category, text, embedding, metadata);
        self.knowledge.insert(entry).await?;

        Ok(ToolResponse::ok_message(format!(
            "Added \"{name}\" to the knowledge base."
        )))
    }

    async fn update_lore(
        &self,
        caller: &CallerContext,
        args: &serde_json::Value,
    ) -> LoreResult<ToolResponse> {
        self.require_elevated(caller, ToolKind::UpdateLore)?;
        let name = require_str(args, "name")?;
        let text = require_str(args, "text")?;

        let embedding = self.gateway.embed(name).await?;
        let hits = self.knowledge.query(&embedding, 1, false).await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(ToolResponse::failure(format!(
                "No entry resembling \"{name}\" exists yet. Use add_lore instead."
            )));
        };

        // The nearest neighbor can still be the wrong entity; confirm identity
        let verdict = self
            .gateway
            .complete(&format!(
                "Does this entry describe \"{name}\"? Answer yes or no only.\n\n\
                 Entry \"{}\": {}",
                hit.entry.name, hit.entry.content
            ))
            .await?;
        if !verdict.trim().to_lowercase().starts_with("yes") {
            return Ok(ToolResponse::failure(format!(
                "I couldn't confidently match \"{name}\" to an existing entry."
            )));
        }

        let merged = self
            .gateway
            .complete(&format!(
                "Rewrite this knowledge entry to incorporate the new information. \
                 Keep everything still true, replace what changed, stay concise. \
                 Reply with the rewritten entry text only.\n\n\
                 Current entry:\n{}\n\nNew information:\n{text}",
                hit.entry.content
            ))
            .await?;

        let mut metadata = hit.entry.metadata.clone();
        metadata.verified = true;
        metadata.source = caller.display_name.clone();
        let new_embedding = self
            .gateway
            .embed(&format!("{} {merged}", hit.entry.name))
            .await?;
        self.knowledge
            .update(&hit.entry.id, merged.trim().to_string(), metadata, new_embedding)
            .await?;

        Ok(ToolResponse::ok_message(format!(
            "Updated \"{}\" with the new information.",
            hit.entry.name
        )))
    }

    async fn save_memory(
        &self,
        caller: &CallerContext,
        args: &serde_json::Value,
    ) -> LoreResult<ToolResponse> {
        let key = require_str(args, "key")?;
        let value = require_str(args, "value")?;
        self.memory
            .upsert(MemoryEntry::new(&caller.caller_id, key, value))
            .await?;
        Ok(ToolResponse::ok_message(format!(
            "I'll remember that ({key})."
        )))
    }

    async fn web_search(
        &self,
        caller: &CallerContext,
        args: &serde_json::Value,
    ) -> LoreResult<ToolResponse> {
        if !caller.web_intent {
            return Ok(ToolResponse::failure(
                "Web search runs only when explicitly requested.",
            ));
        }
        let Some(web) = &self.web else {
            return Ok(ToolResponse::failure("Web search is not configured."));
        };
        let query = require_str(args, "query")?;
        let answer = web.search_answer(query).await?;
        Ok(ToolResponse::ok_answer(answer))
    }

    fn require_elevated(&self, caller: &CallerContext, kind: ToolKind) -> LoreResult<()> {
        if self.privilege.has_elevated(&caller.caller_id) {
            Ok(())
        } else {
            Err(LoreError::PermissionDenied {
                tool_name: kind.name().into(),
                caller: caller.caller_id.clone(),
            })
        }
    }

    /// One structuring call turning free text into a typed entry skeleton.
    async fn structure_lore(&self, text: &str) -> LoreResult<StructuredLore> {
        let prompt = format!(
            "Extract structured data about this game entity (item, weapon, armor, \
             location, event, character, guide, or lore) from the raw text. \
             Use null for missing fields. Reply with only this JSON object:\n\
             {{\n\
               \"entity_name\": \"string\",\n\
               \"entity_type\": \"string\",\n\
               \"description\": \"string\",\n\
               \"effects\": [\"string\"],\n\
               \"stats\": {{\"percentages\": [\"string\"], \"numbers\": [\"string\"], \"durations\": [\"string\"]}},\n\
               \"related_entities\": [\"string\"],\n\
               \"notes\": \"string\"\n\
             }}\n\n\
             Raw text: '''{text}'''"
        );

        let reply = self.gateway.complete(&prompt).await?;
        let cleaned = strip_code_fences(&reply);
        serde_json::from_str(cleaned).map_err(|_| {
            tracing::warn!(raw = %reply, "structuring reply was not valid JSON");
            LoreError::MalformedOutput {
                context: "structuring lore entry".into(),
                raw: reply,
            }
        })
    }
}

/// Skeleton returned by the structuring call. Every field is optional —
/// the model may emit nulls or drop keys entirely.
#[derive(Debug, Default, Deserialize)]
struct StructuredLore {
    entity_name: Option<String>,
    entity_type: Option<String>,
    description: Option<String>,
    effects: Option<Vec<String>>,
    stats: Option<StructuredStats>,
    related_entities: Option<Vec<String>>,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredStats {
    percentages: Option<Vec<String>>,
    numbers: Option<Vec<String>>,
    durations: Option<Vec<String>>,
}

impl StructuredLore {
    /// Merge the model's skeleton with regex-extracted stats and effects.
    fn into_metadata(self, raw_text: &str, source: &str) -> KnowledgeMetadata {
        let mut description = self.description.unwrap_or_default();
        if let Some(notes) = self.notes.filter(|n| !n.is_empty()) {
            if description.is_empty() {
                description = notes;
            } else {
                description = format!("{description} {notes}");
            }
        }

        let mut effects = self.effects.unwrap_or_default();
        for effect in extract_effects(raw_text) {
            if !effects.contains(&effect) {
                effects.push(effect);
            }
        }

        let mut stats = self
            .stats
            .map(|s| StatBlock {
                percentages: s.percentages.unwrap_or_default(),
                numbers: s.numbers.unwrap_or_default(),
                durations: s.durations.unwrap_or_default(),
            })
            .unwrap_or_default();
        let extracted = extract_stats(raw_text);
        merge_unique(&mut stats.percentages, extracted.percentages);
        merge_unique(&mut stats.numbers, extracted.numbers);
        merge_unique(&mut stats.durations, extracted.durations);

        KnowledgeMetadata {
            description,
            effects,
            stats,
            related_entities: self.related_entities.unwrap_or_default(),
            source: source.to_string(),
            verified: true,
        }
    }
}

fn merge_unique(target: &mut Vec<String>, additions: Vec<String>) {
    for item in additions {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

fn require_str<'a>(args: &'a serde_json::Value, field: &str) -> LoreResult<&'a str> {
    args.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| LoreError::MalformedOutput {
            context: format!("reading tool argument '{field}'"),
            raw: args.to_string(),
        })
}

/// Strip a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn percentage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[+-]?\d+%").unwrap())
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[+-]?\d+").unwrap())
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\s*(?:min(?:ute)?s?|hours?|seconds?)").unwrap())
}

fn effect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:increases?|decreases?|boosts?|reduces?|gains?|buffs?|provides?)\s[^.]*")
            .unwrap()
    })
}

/// Pull numeric stats out of raw entry text.
fn extract_stats(text: &str) -> StatBlock {
    StatBlock {
        percentages: percentage_re()
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect(),
        numbers: number_re()
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect(),
        durations: duration_re()
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect(),
    }
}

/// Pull effect phrases ("increases fire damage by 25%") out of raw text.
fn extract_effects(text: &str) -> Vec<String> {
    effect_re()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
