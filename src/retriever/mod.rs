//! Tiered knowledge retrieval: precise search, broad escalation, answer
//! synthesis with an explicit confidence signal, and web fallback.
//!
//! Single-shot vector search is precision-limited over a small hand-curated
//! knowledge base. The retriever instead runs a staged protocol and lets the
//! model signal its own confidence, so an answer is either grounded in stored
//! context or explicitly reported as not found — never fabricated.

use std::sync::Arc;

use crate::config::RetrieverConfig;
use crate::error::{LoreError, LoreResult};
use crate::gateway::GenerationGateway;
use crate::knowledge::KnowledgeStore;
use crate::tool::strip_code_fences;
use crate::types::KnowledgeHit;

/// Sentinel the model emits in place of an answer when context is insufficient.
pub const NO_ANSWER_SENTINEL: &str = "KNOWLEDGE_GAP";

/// Trailing marker the model appends when it answered but is unsure.
pub const LOW_CONFIDENCE_MARKER: &str = "[LOW_CONFIDENCE]";

/// External search-augmented generation collaborator.
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    async fn search_answer(&self, query: &str) -> LoreResult<String>;
}

/// Where the final answer text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    KnowledgeBase,
    SingleDocument,
    WebSearch,
}

/// Outcome of one retrieval run.
#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Answer {
        text: String,
        low_confidence: bool,
        source: AnswerSource,
    },
    NothingFound {
        message: String,
    },
}

impl RetrievalOutcome {
    pub fn is_answer(&self) -> bool {
        matches!(self, RetrievalOutcome::Answer { .. })
    }
}

enum Breadth {
    Precise,
    Broad,
}

pub struct TieredRetriever {
    gateway: Arc<GenerationGateway>,
    knowledge: Arc<dyn KnowledgeStore>,
    web: Option<Arc<dyn WebSearch>>,
    config: RetrieverConfig,
}

impl TieredRetriever {
    pub fn new(
        gateway: Arc<GenerationGateway>,
        knowledge: Arc<dyn KnowledgeStore>,
        web: Option<Arc<dyn WebSearch>>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            gateway,
            knowledge,
            web,
            config,
        }
    }

    /// Run the staged protocol for one query.
    ///
    /// `web_allowed` gates the final escalation; the store being unavailable
    /// surfaces as `StoreUnavailable`, everything else resolves to an outcome.
    pub async fn retrieve(&self, query: &str, web_allowed: bool) -> LoreResult<RetrievalOutcome> {
        if !self.knowledge.health_check().await {
            return Err(LoreError::StoreUnavailable("knowledge store".into()));
        }

        // Stage 1: precise keywords
        let keywords = self.expand_keywords(query, Breadth::Precise).await;
        let mut hits = self.search(&keywords).await?;

        // Stage 2: escalate to broader keywords
        if hits.is_empty() {
            tracing::debug!(query, "precise search empty, broadening");
            let keywords = self.expand_keywords(query, Breadth::Broad).await;
            hits = self.search(&keywords).await?;
        }

        if hits.is_empty() {
            return Ok(nothing_found(query));
        }

        // Stage 3: synthesis with confidence signal
        let answer = self
            .gateway
            .complete(&build_synthesis_prompt(query, &hits))
            .await?;

        if answer.contains(NO_ANSWER_SENTINEL) {
            return Ok(nothing_found(query));
        }

        if !answer.contains(LOW_CONFIDENCE_MARKER) {
            return Ok(RetrievalOutcome::Answer {
                text: answer.trim().to_string(),
                low_confidence: false,
                source: AnswerSource::KnowledgeBase,
            });
        }

        // Stage 4: low confidence — focus on the single best document
        tracing::debug!(query, "low-confidence answer, trying focused pass");
        let fallback = strip_marker(&answer);
        match self.focused_pass(query, &hits).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => self.escalate_or(fallback, query, web_allowed).await,
            Err(e) => {
                tracing::warn!(error = %e, "focused pass failed");
                self.escalate_or(fallback, query, web_allowed).await
            }
        }
    }

    /// Ask the model for search keywords. Falls back to the raw query when the
    /// reply is unusable — retrieval degrades, it does not abort.
    async fn expand_keywords(&self, query: &str, breadth: Breadth) -> Vec<String> {
        let prompt = match breadth {
            Breadth::Precise => format!(
                "Extract 3-5 precise game-domain search keywords for this question. \
                 Prefer item names, status effects, and mechanic terms. \
                 Reply with a JSON array of strings only.\n\nQuestion: {query}"
            ),
            Breadth::Broad => format!(
                "The precise search found nothing. Give 3-5 broader, more general \
                 keywords for the same question — categories and related mechanics \
                 rather than exact names. Reply with a JSON array of strings only.\n\n\
                 Question: {query}"
            ),
        };

        match self.gateway.complete(&prompt).await {
            Ok(reply) => {
                let keywords = parse_keywords(&reply);
                if keywords.is_empty() {
                    tracing::warn!(raw = %reply, "unusable keyword reply, using raw query");
                    vec![query.to_string()]
                } else {
                    keywords
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "keyword expansion failed, using raw query");
                vec![query.to_string()]
            }
        }
    }

    /// Embed the keywords and query the store, verified entries first.
    async fn search(&self, keywords: &[String]) -> LoreResult<Vec<KnowledgeHit>> {
        let embedding = self.gateway.embed(&keywords.join(" ")).await?;

        // Curated entries win when the best of them is close enough
        let verified = self
            .knowledge
            .query(&embedding, self.config.top_k, true)
            .await?;
        let qualifying = within_threshold(verified, self.config.distance_threshold);
        if !qualifying.is_empty() {
            return Ok(qualifying);
        }

        let all = self
            .knowledge
            .query(&embedding, self.config.top_k, false)
            .await?;
        Ok(within_threshold(all, self.config.distance_threshold))
    }

    /// Pick the single best-matching document by index and answer from it alone.
    /// `Ok(None)` means the focused answer was still not confident.
    async fn focused_pass(
        &self,
        query: &str,
        hits: &[KnowledgeHit],
    ) -> LoreResult<Option<RetrievalOutcome>> {
        let listing: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{i}: {}", h.entry.name))
            .collect();
        let pick_prompt = format!(
            "Which single document best answers this question? \
             Reply with only its number.\n\nQuestion: {query}\n\nDocuments:\n{}",
            listing.join("\n")
        );

        let reply = self.gateway.complete(&pick_prompt).await?;
        let index: usize = reply
            .trim()
            .parse()
            .map_err(|_| LoreError::MalformedOutput {
                context: "picking focus document".into(),
                raw: reply.clone(),
            })?;
        let hit = hits.get(index).ok_or_else(|| LoreError::MalformedOutput {
            context: "picking focus document".into(),
            raw: reply,
        })?;

        let focused = std::slice::from_ref(hit);
        let answer = self
            .gateway
            .complete(&build_synthesis_prompt(query, focused))
            .await?;

        if answer.contains(NO_ANSWER_SENTINEL) || answer.contains(LOW_CONFIDENCE_MARKER) {
            return Ok(None);
        }
        Ok(Some(RetrievalOutcome::Answer {
            text: answer.trim().to_string(),
            low_confidence: false,
            source: AnswerSource::SingleDocument,
        }))
    }

    /// Escalate to web search when permitted, otherwise return the uncertain
    /// answer marked as such.
    async fn escalate_or(
        &self,
        fallback: String,
        query: &str,
        web_allowed: bool,
    ) -> LoreResult<RetrievalOutcome> {
        if web_allowed && self.config.web_escalation {
            if let Some(web) = &self.web {
                tracing::debug!(query, "escalating to web search");
                match web.search_answer(query).await {
                    Ok(text) => {
                        return Ok(RetrievalOutcome::Answer {
                            text,
                            low_confidence: false,
                            source: AnswerSource::WebSearch,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "web escalation failed");
                    }
                }
            }
        }
        Ok(RetrievalOutcome::Answer {
            text: fallback,
            low_confidence: true,
            source: AnswerSource::KnowledgeBase,
        })
    }
}

fn nothing_found(query: &str) -> RetrievalOutcome {
    RetrievalOutcome::NothingFound {
        message: format!("I couldn't find anything in the knowledge base about \"{query}\"."),
    }
}

fn within_threshold(hits: Vec<KnowledgeHit>, threshold: f32) -> Vec<KnowledgeHit> {
    hits.into_iter()
        .filter(|h| h.distance <= threshold)
        .collect()
}

fn strip_marker(answer: &str) -> String {
    answer.replace(LOW_CONFIDENCE_MARKER, "").trim().to_string()
}

fn build_synthesis_prompt(query: &str, hits: &[KnowledgeHit]) -> String {
    let context: Vec<String> = hits
        .iter()
        .map(|h| {
            let tag = if h.entry.metadata.verified {
                "[VERIFIED]"
            } else {
                "[UNVERIFIED]"
            };
            format!("{tag} {} — {}", h.entry.name, h.entry.content)
        })
        .collect();

    format!(
        "Answer the question using only the context below. Treat [UNVERIFIED] \
         entries as player reports, not established fact.\n\
         If the context does not contain the answer, reply with exactly \
         {NO_ANSWER_SENTINEL}.\n\
         If you can answer but are not certain, append {LOW_CONFIDENCE_MARKER} \
         at the end.\n\n\
         Context:\n{}\n\nQuestion: {query}",
        context.join("\n")
    )
}

/// Parse a keyword reply: JSON array first, comma/newline separated as fallback.
fn parse_keywords(reply: &str) -> Vec<String> {
    let cleaned = strip_code_fences(reply);

    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(cleaned) {
        let keywords: Vec<String> = items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !keywords.is_empty() {
            return truncate_keywords(keywords);
        }
    }

    let keywords: Vec<String> = cleaned
        .split(|c| c == ',' || c == '\n')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '-').trim())
        .filter(|s| !s.is_empty() && s.len() < 80)
        .map(str::to_string)
        .collect();
    truncate_keywords(keywords)
}

fn truncate_keywords(mut keywords: Vec<String>) -> Vec<String> {
    keywords.truncate(5);
    keywords
}
