use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Message Types ──────────────────────────────────────────────────────────

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A content block within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        ContentBlock::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// A message in a model conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentBlock::tool_result(tool_call_id, content, is_error)],
        )
    }

    /// Extract tool calls from this message
    pub fn tool_calls(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|c| matches!(c, ContentBlock::ToolCall { .. }))
            .collect()
    }

    /// Check if this message contains tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, ContentBlock::ToolCall { .. }))
    }

    /// Get text content concatenated
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ─── Tool Definition ─────────────────────────────────────────────────────────

/// Schema for a tool's input parameters, sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ─── Conversation Turns ──────────────────────────────────────────────────────

/// A single held turn in a conversation window.
///
/// Distinct from [`Message`]: turns carry the platform author for summarization
/// prompts, while messages are what the provider sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub author: String,
    pub text: String,
}

impl ChatTurn {
    pub fn new(role: Role, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            author: author.into(),
            text: text.into(),
        }
    }
}

// ─── Knowledge Entries ───────────────────────────────────────────────────────

/// Category of a knowledge entry, inferred during structuring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    Weapon,
    Armor,
    Mod,
    Food,
    Material,
    Location,
    Event,
    Character,
    Guide,
    Lore,
    General,
}

impl EntryCategory {
    /// Parse a category label from a structuring call, defaulting to General.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "weapon" => EntryCategory::Weapon,
            "armor" | "armor_set" | "armor_general" | "key_gear" => EntryCategory::Armor,
            "mod" | "weapon_mod" | "armor_mod" | "mod_general" => EntryCategory::Mod,
            "food" | "food_buffs" => EntryCategory::Food,
            "material" => EntryCategory::Material,
            "location" => EntryCategory::Location,
            "event" => EntryCategory::Event,
            "character" => EntryCategory::Character,
            "guide" => EntryCategory::Guide,
            "lore" => EntryCategory::Lore,
            _ => EntryCategory::General,
        }
    }
}

impl std::fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryCategory::Weapon => "weapon",
            EntryCategory::Armor => "armor",
            EntryCategory::Mod => "mod",
            EntryCategory::Food => "food",
            EntryCategory::Material => "material",
            EntryCategory::Location => "location",
            EntryCategory::Event => "event",
            EntryCategory::Character => "character",
            EntryCategory::Guide => "guide",
            EntryCategory::Lore => "lore",
            EntryCategory::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Numeric stats extracted from entry text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatBlock {
    #[serde(default)]
    pub percentages: Vec<String>,
    #[serde(default)]
    pub numbers: Vec<String>,
    #[serde(default)]
    pub durations: Vec<String>,
}

impl StatBlock {
    pub fn is_empty(&self) -> bool {
        self.percentages.is_empty() && self.numbers.is_empty() && self.durations.is_empty()
    }
}

/// Structured metadata attached to a knowledge entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub stats: StatBlock,
    #[serde(default)]
    pub related_entities: Vec<String>,
    /// Where the content came from (e.g. the contributing user or document).
    #[serde(default)]
    pub source: String,
    /// Curated entries are verified; conversationally-sourced ones start unverified.
    #[serde(default)]
    pub verified: bool,
}

/// A single entry in the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub name: String,
    pub category: EntryCategory,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: KnowledgeMetadata,
}

impl KnowledgeEntry {
    pub fn new(
        name: impl Into<String>,
        category: EntryCategory,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: KnowledgeMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            category,
            content: content.into(),
            embedding,
            metadata,
        }
    }
}

/// A ranked hit from a knowledge store query. Lower distance is closer.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub entry: KnowledgeEntry,
    pub distance: f32,
}

// ─── Memory Entries ──────────────────────────────────────────────────────────

/// A long-term memory fact for one user, unique per (user_id, key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub user_id: String,
    pub key: String,
    pub value: String,
}

impl MemoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

// ─── Caller Context ──────────────────────────────────────────────────────────

/// Who is asking, and what they are allowed to trigger.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub caller_id: String,
    pub display_name: String,
    /// Set by the host when the user explicitly asked for a web lookup.
    pub web_intent: bool,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            display_name: display_name.into(),
            web_intent: false,
        }
    }

    pub fn with_web_intent(mut self) -> Self {
        self.web_intent = true;
        self
    }
}
