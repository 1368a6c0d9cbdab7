//! Conversation context assembled from ranked memories
//!
//! Turns a search result into something a dialogue prompt can consume: a short
//! summary, the latest interaction time, and a relationship score derived from
//! emotion tags.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{MemoryCategory, RankedMemory};

const POSITIVE_TAGS: [&str; 5] = ["grateful", "trust", "friendly", "joy", "admiration"];
const NEGATIVE_TAGS: [&str; 5] = ["anger", "disappointment", "suspicion", "fear", "disgust"];

/// Number of distinct tags surfaced in the summary
const SUMMARY_TAG_LIMIT: usize = 3;

const NO_INTERACTIONS: &str = "No previous interactions";

/// Context block returned by `GET /context`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContext {
    pub memories: Vec<RankedMemory>,
    pub summary: String,
    pub category_counts: BTreeMap<MemoryCategory, usize>,
    pub top_tags: Vec<String>,
    pub total_interactions: usize,
    pub last_interaction: Option<DateTime<Utc>>,
    /// In [-1, 1]; 0 when no emotion tags are present
    pub relationship_score: f64,
}

impl MemoryContext {
    pub fn from_ranked(memories: Vec<RankedMemory>) -> Self {
        let mut category_counts = BTreeMap::new();
        let mut top_tags: Vec<String> = Vec::new();

        for ranked in &memories {
            *category_counts.entry(ranked.memory.category).or_insert(0) += 1;
            for tag in &ranked.memory.tags {
                if top_tags.len() < SUMMARY_TAG_LIMIT && !top_tags.contains(tag) {
                    top_tags.push(tag.clone());
                }
            }
        }

        let summary = render_summary(&category_counts, &top_tags);
        let last_interaction = memories.iter().map(|m| m.memory.created_at).max();
        let relationship_score = relationship_score(&memories);

        Self {
            total_interactions: memories.len(),
            memories,
            summary,
            category_counts,
            top_tags,
            last_interaction,
            relationship_score,
        }
    }
}

fn render_summary(counts: &BTreeMap<MemoryCategory, usize>, tags: &[String]) -> String {
    if counts.is_empty() {
        return NO_INTERACTIONS.to_string();
    }

    let parts: Vec<String> = counts
        .iter()
        .map(|(category, count)| {
            let noun = if *count == 1 { "memory" } else { "memories" };
            format!("{count} {category} {noun}")
        })
        .collect();

    let mut summary = parts.join(", ");
    if !tags.is_empty() {
        summary.push_str("; main emotions: ");
        summary.push_str(&tags.join(", "));
    }
    summary
}

/// (positive - negative) / (positive + negative) over every tag occurrence
pub fn relationship_score(memories: &[RankedMemory]) -> f64 {
    let (mut positive, mut negative) = (0usize, 0usize);

    for tag in memories.iter().flat_map(|m| m.memory.tags.iter()) {
        let tag = tag.as_str();
        if POSITIVE_TAGS.contains(&tag) {
            positive += 1;
        } else if NEGATIVE_TAGS.contains(&tag) {
            negative += 1;
        }
    }

    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (positive as f64 - negative as f64) / total as f64
}
