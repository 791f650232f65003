use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use lore_core::config::RetrieverConfig;
use lore_core::conversation::ConversationStore;
use lore_core::credential::CredentialPool;
use lore_core::dispatch::Dispatcher;
use lore_core::error::{LoreError, LoreResult};
use lore_core::gateway::GenerationGateway;
use lore_core::knowledge::{InMemoryKnowledgeStore, KnowledgeStore};
use lore_core::memory::{InMemoryMemoryStore, MemoryStore, RelevanceFilter};
use lore_core::orchestrator::{InboundMessage, Orchestrator};
use lore_core::provider::Provider;
use lore_core::research::{ResearchPlan, ResearchRunner, ResearchStatus, ResearchStep};
use lore_core::retriever::TieredRetriever;
use lore_core::tool::{PrivilegeCheck, ToolKind, Toolbox};
use lore_core::types::*;

// ─── Mock Provider ──────────────────────────────────────────────────────────

/// Replays a queue of canned messages; embeddings are a deterministic
/// bag-of-words over a small vocabulary.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Message>>,
    chat_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            chat_calls: AtomicUsize::new(0),
        }
    }

    fn texts(replies: Vec<&str>) -> Self {
        Self::new(replies.into_iter().map(Message::assistant).collect())
    }
}

fn bag_embed(text: &str) -> Vec<f32> {
    const VOCAB: &[&str] = &["burn", "status", "effect", "frost", "damage", "spreads"];
    let mut v = vec![0.0f32; VOCAB.len() + 1];
    for word in text.to_lowercase().split_whitespace() {
        match VOCAB.iter().position(|w| *w == word) {
            Some(i) => v[i] += 1.0,
            None => v[VOCAB.len()] += 1.0,
        }
    }
    v
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _messages: &[Message],
        _system: Option<&str>,
        _tools: &[ToolDefinition],
        _model: &str,
        _key: &str,
    ) -> LoreResult<Message> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LoreError::Provider("script exhausted".into()))
    }

    async fn embed(&self, text: &str, _model: &str, _key: &str) -> LoreResult<Vec<f32>> {
        Ok(bag_embed(text))
    }
}

struct AllowAll;
impl PrivilegeCheck for AllowAll {
    fn has_elevated(&self, _caller_id: &str) -> bool {
        true
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    gateway: Arc<GenerationGateway>,
    knowledge: Arc<InMemoryKnowledgeStore>,
    memory: Arc<InMemoryMemoryStore>,
    toolbox: Arc<Toolbox>,
}

fn harness(provider: Arc<ScriptedProvider>) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let gateway = Arc::new(GenerationGateway::new(
        provider,
        CredentialPool::new(vec!["key-a".into(), "key-b".into()]).unwrap(),
        "test-model",
        "test-embed",
        Duration::from_secs(5),
    ));
    let knowledge = Arc::new(InMemoryKnowledgeStore::new());
    let memory = Arc::new(InMemoryMemoryStore::new());
    let retriever = Arc::new(TieredRetriever::new(
        gateway.clone(),
        knowledge.clone(),
        None,
        RetrieverConfig::default(),
    ));
    let toolbox = Arc::new(Toolbox::new(
        gateway.clone(),
        retriever,
        knowledge.clone(),
        memory.clone(),
        Arc::new(AllowAll),
        None,
    ));
    Harness {
        gateway,
        knowledge,
        memory,
        toolbox,
    }
}

fn caller() -> CallerContext {
    CallerContext::new("u1", "Ada")
}

fn tool_call_message(calls: Vec<(&str, &str, serde_json::Value)>) -> Message {
    Message::new(
        Role::Assistant,
        calls
            .into_iter()
            .map(|(id, name, args)| ContentBlock::tool_call(id, name, args))
            .collect(),
    )
}

// ─── Scenario: empty knowledge base ─────────────────────────────────────────

#[tokio::test]
async fn empty_store_query_reports_nothing_found() {
    // First pass requests a search; both keyword stages find nothing; the
    // second pass relays the failure.
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_message(vec![(
            "search_knowledge_base-0",
            "search_knowledge_base",
            json!({"query": "what are the effects of Burn status?"}),
        )]),
        Message::assistant(r#"["burn", "status", "effects"]"#),
        Message::assistant(r#"["status effects", "debuffs"]"#),
        Message::assistant("I couldn't find anything about Burn status in the knowledge base."),
    ]));
    let h = harness(provider);
    let dispatcher = Dispatcher::new(h.gateway.clone(), h.toolbox.clone());

    let reply = dispatcher
        .respond(
            "what are the effects of Burn status?",
            &caller(),
            Vec::new(),
            "You are the lore keeper.",
        )
        .await
        .unwrap();

    assert!(reply.contains("couldn't find"));
    assert!(h.knowledge.is_empty().await);
}

// ─── Scenario: two tools in one round ───────────────────────────────────────

#[tokio::test]
async fn search_and_save_memory_resolve_in_one_round() {
    let h = harness(Arc::new(ScriptedProvider::new(vec![
        tool_call_message(vec![
            (
                "search_knowledge_base-0",
                "search_knowledge_base",
                json!({"query": "Burn status"}),
            ),
            (
                "save_memory-1",
                "save_memory",
                json!({"key": "interest", "value": "status effects"}),
            ),
        ]),
        Message::assistant(r#"["burn", "status", "effect"]"#),
        Message::assistant("Burn deals damage over time and spreads on contact."),
        Message::assistant(
            "Burn deals damage over time. I'll also remember you're into status effects.",
        ),
    ])));
    h.knowledge
        .insert(KnowledgeEntry::new(
            "Burn status",
            EntryCategory::Lore,
            "Burn deals damage over time and spreads on contact.",
            bag_embed("burn status effect"),
            KnowledgeMetadata {
                verified: true,
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(h.gateway.clone(), h.toolbox.clone());
    let reply = dispatcher
        .respond(
            "what does Burn do? remember I like status effects",
            &caller(),
            Vec::new(),
            "You are the lore keeper.",
        )
        .await
        .unwrap();

    // One string reflecting both actions
    assert!(reply.contains("damage over time"));
    assert!(reply.contains("remember"));

    let memories = h.memory.list_by_user("u1").await.unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].value, "status effects");
}

// ─── Scenario: summarization after nine appends ─────────────────────────────

#[tokio::test]
async fn nine_appends_summarize_once_via_store() {
    let provider = Arc::new(ScriptedProvider::texts(vec![
        "Ada asked about several weapons and got recommendations.",
    ]));
    let h = harness(provider.clone());
    let store = Arc::new(ConversationStore::new(h.gateway.clone(), 8));

    for i in 0..9 {
        store.append("c1", Role::User, "Ada", &format!("question {i}"));
        tokio::task::yield_now().await;
    }
    for _ in 0..100 {
        if !store.is_summarizing("c1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(provider.chat_calls.load(Ordering::SeqCst), 1);
    let summary = store.summary("c1").unwrap();
    assert_eq!(summary, "Ada asked about several weapons and got recommendations.");
    assert!(store.held_turns("c1") <= 1);
}

// ─── Scenario: add then retrieve round trip ─────────────────────────────────

#[tokio::test]
async fn added_entry_is_retrievable_by_name() {
    let h = harness(Arc::new(ScriptedProvider::texts(vec![
        // add_lore structuring reply
        r#"{"entity_name": "Pyroclasm Starter", "entity_type": "weapon", "description": "Incendiary shotgun", "effects": ["ignites enemies"], "stats": null, "related_entities": [], "notes": null}"#,
        // retrieval keyword expansion
        r#"["Pyroclasm Starter"]"#,
        // synthesis
        "The Pyroclasm Starter is an incendiary shotgun that ignites enemies.",
    ])));

    let added = h
        .toolbox
        .execute(
            &caller(),
            ToolKind::AddLore,
            &json!({"text": "Pyroclasm Starter is an incendiary shotgun that ignites enemies", "source": "wiki"}),
        )
        .await;
    assert!(added.success, "{added:?}");

    // The entry ranks in the top-K for its own name
    let query_embedding = bag_embed("Pyroclasm Starter");
    let hits = h.knowledge.query(&query_embedding, 10, false).await.unwrap();
    assert!(hits.iter().any(|hit| hit.entry.name == "Pyroclasm Starter"));

    // And the full tiered retrieval path answers from it
    let response = h
        .toolbox
        .execute(
            &caller(),
            ToolKind::SearchKnowledgeBase,
            &json!({"query": "Pyroclasm Starter"}),
        )
        .await;
    assert!(response.success, "{response:?}");
    assert!(response.answer.unwrap().contains("ignites"));
}

// ─── Scenario: research iteration determinism ───────────────────────────────

/// Fails any structuring call that mentions item "b".
struct ItemBHater;

#[async_trait::async_trait]
impl Provider for ItemBHater {
    fn name(&self) -> &str {
        "item-b-hater"
    }

    async fn chat(
        &self,
        messages: &[Message],
        _system: Option<&str>,
        _tools: &[ToolDefinition],
        _model: &str,
        _key: &str,
    ) -> LoreResult<Message> {
        let prompt = messages
            .iter()
            .map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join(" ");
        if prompt.contains("'''b") {
            return Err(LoreError::Provider("refused".into()));
        }
        Ok(Message::assistant(
            r#"{"entity_name": "a", "entity_type": "lore", "description": "entry", "effects": [], "stats": null, "related_entities": [], "notes": null}"#,
        ))
    }

    async fn embed(&self, text: &str, _model: &str, _key: &str) -> LoreResult<Vec<f32>> {
        Ok(bag_embed(text))
    }
}

#[tokio::test]
async fn iteration_collects_every_item_even_on_failure() {
    let gateway = Arc::new(GenerationGateway::new(
        Arc::new(ItemBHater),
        CredentialPool::new(vec!["k".into()]).unwrap(),
        "m",
        "e",
        Duration::from_secs(5),
    ));
    let knowledge = Arc::new(InMemoryKnowledgeStore::new());
    let memory = Arc::new(InMemoryMemoryStore::new());
    let retriever = Arc::new(TieredRetriever::new(
        gateway.clone(),
        knowledge.clone(),
        None,
        RetrieverConfig::default(),
    ));
    let toolbox = Arc::new(Toolbox::new(
        gateway,
        retriever,
        knowledge,
        memory,
        Arc::new(AllowAll),
        None,
    ));
    let runner = ResearchRunner::new(toolbox);

    let plan = ResearchPlan {
        steps: vec![ResearchStep {
            step_id: "s1".into(),
            tool: "add_lore".into(),
            parameters: json!({"text": "{item}"}),
            depends_on: None,
            iterate_over: Some("items".into()),
            output_key: Some("results".into()),
        }],
    };
    let mut seed = serde_json::Map::new();
    seed.insert("items".into(), json!(["a", "b"]));

    let state = runner.execute_seeded(plan, &caller(), seed).await;
    assert_eq!(state.status, ResearchStatus::Completed);

    let results = state.collected["results"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.contains_key("a"));
    assert!(results.contains_key("b"));
    assert!(results["b"].get("error").is_some());
    assert!(results["a"].get("error").is_none());
}

// ─── Scenario: relevance filter fails open ──────────────────────────────────

#[tokio::test]
async fn relevance_failure_returns_all_memories_in_order() {
    // Empty script: the classification call errors out
    let h = harness(Arc::new(ScriptedProvider::texts(vec![])));
    let filter = RelevanceFilter::new(h.gateway.clone());

    let memories = vec![
        MemoryEntry::new("u1", "weapon", "crossbow"),
        MemoryEntry::new("u1", "playstyle", "stealth"),
        MemoryEntry::new("u1", "server", "eu-03"),
    ];
    let relevant = filter.filter("what build?", &memories).await;
    assert_eq!(relevant, memories);
}

// ─── Scenario: full orchestrator turn ───────────────────────────────────────

#[tokio::test]
async fn orchestrator_turn_appends_exchange() {
    let provider = Arc::new(ScriptedProvider::texts(vec![
        "Welcome! Ask me anything about the game.",
    ]));
    let h = harness(provider);
    let conversations = Arc::new(ConversationStore::new(h.gateway.clone(), 8));
    let dispatcher = Dispatcher::new(h.gateway.clone(), h.toolbox.clone());
    let relevance = RelevanceFilter::new(h.gateway.clone());
    let orchestrator = Orchestrator::new(
        conversations.clone(),
        dispatcher,
        h.memory.clone(),
        relevance,
        "You are the lore keeper.",
    );

    let reply = orchestrator
        .handle_message(&InboundMessage {
            conversation_id: "c1".into(),
            author_id: "u1".into(),
            author_display_name: "Ada".into(),
            text: "hello!".into(),
            web_intent: false,
        })
        .await
        .unwrap();

    assert_eq!(reply, "Welcome! Ask me anything about the game.");
    assert_eq!(conversations.held_turns("c1"), 2);
    let context = conversations.context("c1");
    assert!(context[0].text_content().contains("hello!"));
}

// ─── Credential pool property ───────────────────────────────────────────────

#[test]
fn pool_rotation_cycles_back() {
    let mut pool = CredentialPool::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
    let start = pool.current().unwrap().to_string();
    for _ in 0..3 {
        pool.rotate();
    }
    assert_eq!(pool.current().unwrap(), start);
}
