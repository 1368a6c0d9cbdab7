//! In-process search index
//!
//! BM25 over whitespace/punctuation tokens for the lexical arm and cosine
//! similarity for the vector arm. Scores are shifted like the Elasticsearch
//! script (`cosine + 1`) so both adapters order hits identically.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Hit, SearchFilter, SearchIndex};
use crate::error::{MemoryError, Result};
use crate::memory::Memory;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Thread-safe in-memory index keyed by document id
#[derive(Debug)]
pub struct InMemoryIndex {
    dimension: usize,
    docs: RwLock<HashMap<String, Memory>>,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Memory> {
        self.docs.read().await.get(id).cloned()
    }
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn sort_hits(hits: &mut Vec<Hit>, size: usize) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(size);
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert(&self, memory: &Memory) -> Result<()> {
        if memory.vector.len() != self.dimension {
            return Err(MemoryError::InvalidInput(format!(
                "vector dimension {} does not match index dimension {}",
                memory.vector.len(),
                self.dimension
            )));
        }
        self.docs
            .write()
            .await
            .insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn lexical_query(&self, text: &str, filter: &SearchFilter, size: usize) -> Result<Vec<Hit>> {
        let query_terms = tokenize(text);
        if query_terms.is_empty() || size == 0 {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().await;
        let tokenized: Vec<(&Memory, Vec<String>)> =
            docs.values().map(|m| (m, tokenize(&m.text))).collect();

        // Corpus statistics span the whole index, as a search engine shard would
        let n = tokenized.len() as f64;
        let avg_len = tokenized.iter().map(|(_, t)| t.len()).sum::<usize>() as f64 / n.max(1.0);
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for term in &query_terms {
            let df = tokenized
                .iter()
                .filter(|(_, tokens)| tokens.iter().any(|t| t == term))
                .count();
            doc_freq.insert(term.as_str(), df);
        }

        let mut hits: Vec<Hit> = tokenized
            .iter()
            .filter(|(m, _)| filter.matches(m))
            .filter_map(|(memory, tokens)| {
                let len = tokens.len() as f64;
                let score: f64 = query_terms
                    .iter()
                    .map(|term| {
                        let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let df = doc_freq.get(term.as_str()).copied().unwrap_or(0) as f64;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0));
                        idf * tf * (BM25_K1 + 1.0) / (tf + norm)
                    })
                    .sum();
                (score > 0.0).then(|| Hit {
                    id: memory.id.clone(),
                    score,
                    memory: (*memory).clone(),
                })
            })
            .collect();

        sort_hits(&mut hits, size);
        Ok(hits)
    }

    async fn vector_query(&self, vector: &[f32], filter: &SearchFilter, size: usize) -> Result<Vec<Hit>> {
        if vector.len() != self.dimension {
            return Err(MemoryError::InvalidInput(format!(
                "query vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }

        let docs = self.docs.read().await;
        let mut hits: Vec<Hit> = docs
            .values()
            .filter(|m| filter.matches(m))
            .map(|m| Hit {
                id: m.id.clone(),
                score: f64::from(cosine_similarity(vector, &m.vector)) + 1.0,
                memory: m.clone(),
            })
            .collect();

        sort_hits(&mut hits, size);
        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCategory;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn memory(id: &str, text: &str, vector: Vec<f32>) -> Memory {
        Memory {
            id: id.to_string(),
            subject_id: "npc_smith".to_string(),
            target_id: "player_1".to_string(),
            category: MemoryCategory::Dialogue,
            text: text.to_string(),
            vector,
            tags: Vec::new(),
            importance: 0.5,
            created_at: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    fn filter() -> SearchFilter {
        SearchFilter::new("npc_smith", "player_1")
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! x2"), vec!["hello", "world", "x2"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let index = InMemoryIndex::new(2);
        index.upsert(&memory("a", "first", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&memory("a", "second", vec![0.0, 1.0])).await.unwrap();

        assert_eq!(index.len().await, 1);
        assert_eq!(index.get("a").await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let index = InMemoryIndex::new(3);
        let err = index.upsert(&memory("a", "x", vec![1.0])).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_lexical_prefers_matching_terms() {
        let index = InMemoryIndex::new(2);
        index
            .upsert(&memory("sword", "forged a steel sword for the hero", vec![1.0, 0.0]))
            .await
            .unwrap();
        index
            .upsert(&memory("bread", "sold fresh bread at the market", vec![0.0, 1.0]))
            .await
            .unwrap();
        index
            .upsert(&memory("both", "sword and sword polish", vec![0.5, 0.5]))
            .await
            .unwrap();

        let hits = index.lexical_query("sword", &filter(), 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"sword") && ids.contains(&"both"));
        assert!(!ids.contains(&"bread"));
        assert_eq!(ids[0], "both");
    }

    #[tokio::test]
    async fn test_vector_query_orders_by_similarity() {
        let index = InMemoryIndex::new(2);
        index.upsert(&memory("east", "e", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&memory("north", "n", vec![0.0, 1.0])).await.unwrap();
        index.upsert(&memory("west", "w", vec![-1.0, 0.0])).await.unwrap();

        let hits = index.vector_query(&[0.9, 0.1], &filter(), 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "east");
        assert_eq!(hits[1].id, "north");
        assert!(hits[0].score <= 2.0 && hits[1].score >= 0.0);
    }

    #[tokio::test]
    async fn test_queries_respect_filter() {
        let index = InMemoryIndex::new(2);
        let mut other = memory("other", "sword", vec![1.0, 0.0]);
        other.target_id = "player_2".to_string();
        index.upsert(&other).await.unwrap();

        assert!(index.lexical_query("sword", &filter(), 5).await.unwrap().is_empty());
        assert!(index.vector_query(&[1.0, 0.0], &filter(), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_query_rejects_wrong_dimension() {
        let index = InMemoryIndex::new(2);
        assert!(index.vector_query(&[1.0], &filter(), 5).await.is_err());
    }
}
