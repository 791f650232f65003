//! Knowledge store seam and the in-memory cosine-distance implementation.

use tokio::sync::RwLock;

use crate::error::{LoreError, LoreResult};
use crate::types::{KnowledgeEntry, KnowledgeHit, KnowledgeMetadata};

/// Vector/keyword knowledge store. The orchestrator only reads and writes
/// through this interface; any engine with ranked nearest-neighbor queries
/// can sit behind it.
#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert(&self, entry: KnowledgeEntry) -> LoreResult<()>;

    /// Replace content, metadata, and embedding of an existing entry.
    async fn update(
        &self,
        id: &str,
        content: String,
        metadata: KnowledgeMetadata,
        embedding: Vec<f32>,
    ) -> LoreResult<()>;

    /// Ranked nearest entries; `verified_only` restricts to curated entries.
    /// Distance is 1 − cosine similarity, lower is closer.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        verified_only: bool,
    ) -> LoreResult<Vec<KnowledgeHit>>;

    async fn health_check(&self) -> bool;
}

/// Cosine distance between two vectors: 1 − cosine similarity.
/// Mismatched or zero-magnitude vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (mag_a * mag_b)
}

/// Process-lifetime knowledge store with exhaustive cosine scoring.
/// Fine for a small hand-curated knowledge base and for tests.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<KnowledgeEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn insert(&self, entry: KnowledgeEntry) -> LoreResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        content: String,
        metadata: KnowledgeMetadata,
        embedding: Vec<f32>,
    ) -> LoreResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::EntryNotFound(id.to_string()))?;
        entry.content = content;
        entry.metadata = metadata;
        entry.embedding = embedding;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        verified_only: bool,
    ) -> LoreResult<Vec<KnowledgeHit>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<KnowledgeHit> = entries
            .iter()
            .filter(|e| !verified_only || e.metadata.verified)
            .map(|e| KnowledgeHit {
                entry: e.clone(),
                distance: cosine_distance(embedding, &e.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryCategory;

    fn entry(name: &str, embedding: Vec<f32>, verified: bool) -> KnowledgeEntry {
        KnowledgeEntry::new(
            name,
            EntryCategory::Lore,
            format!("{name} content"),
            embedding,
            KnowledgeMetadata {
                verified,
                ..Default::default()
            },
        )
    }

    #[test]
    fn cosine_distance_identical_is_zero() {
        let d = cosine_distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_orthogonal_is_one() {
        let d = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_degenerate_inputs() {
        assert_eq!(cosine_distance(&[], &[]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 1.0]), 1.0);
    }

    #[tokio::test]
    async fn query_ranks_by_distance() {
        let store = InMemoryKnowledgeStore::new();
        store.insert(entry("far", vec![0.0, 1.0], false)).await.unwrap();
        store.insert(entry("near", vec![1.0, 0.1], false)).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 10, false).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.name, "near");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn query_verified_only_filters() {
        let store = InMemoryKnowledgeStore::new();
        store.insert(entry("curated", vec![1.0, 0.0], true)).await.unwrap();
        store.insert(entry("hearsay", vec![1.0, 0.0], false)).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 10, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.name, "curated");
    }

    #[tokio::test]
    async fn query_truncates_to_top_k() {
        let store = InMemoryKnowledgeStore::new();
        for i in 0..20 {
            store
                .insert(entry(&format!("e{i}"), vec![1.0, i as f32 * 0.01], false))
                .await
                .unwrap();
        }
        let hits = store.query(&[1.0, 0.0], 5, false).await.unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[tokio::test]
    async fn update_replaces_content_and_embedding() {
        let store = InMemoryKnowledgeStore::new();
        let e = entry("Burn", vec![1.0, 0.0], true);
        let id = e.id.clone();
        store.insert(e).await.unwrap();

        store
            .update(
                &id,
                "Burn now stacks".into(),
                KnowledgeMetadata {
                    verified: true,
                    ..Default::default()
                },
                vec![0.0, 1.0],
            )
            .await
            .unwrap();

        let updated = store.get(&id).await.unwrap();
        assert_eq!(updated.content, "Burn now stacks");
        assert_eq!(updated.embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let store = InMemoryKnowledgeStore::new();
        let result = store
            .update(
                "missing",
                "x".into(),
                KnowledgeMetadata::default(),
                vec![1.0],
            )
            .await;
        assert!(matches!(result, Err(LoreError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn empty_store_queries_empty() {
        let store = InMemoryKnowledgeStore::new();
        assert!(store.query(&[1.0], 10, false).await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }
}
