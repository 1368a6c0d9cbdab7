//! Memory types for the npc-memory pipeline
//!
//! Defines the stored memory document and the ranked form returned by search.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A single memory held by the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Document id; equal to the correlation id of the task that indexed it
    pub id: String,
    /// Character who remembers
    pub subject_id: String,
    /// Character or player the memory is about
    pub target_id: String,
    pub category: MemoryCategory,
    pub text: String,
    /// Embedding of `text`; dimension is fixed per deployment. Not returned to clients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
    /// Deduplicated, sorted tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Stored importance in [0, 1]
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl Memory {
    /// Age in fractional days relative to `now`, clamped at zero for clock skew
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_milliseconds() as f64 / 1000.0;
        (secs / 86_400.0).max(0.0)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Normalize a tag list into set form: trimmed, lowercased, sorted, no duplicates or blanks.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// What kind of interaction a memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Dialogue,
    Quest,
    Trade,
    Gift,
    Combat,
    Emotion,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 6] = [
        MemoryCategory::Dialogue,
        MemoryCategory::Quest,
        MemoryCategory::Trade,
        MemoryCategory::Gift,
        MemoryCategory::Combat,
        MemoryCategory::Emotion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Dialogue => "dialogue",
            MemoryCategory::Quest => "quest",
            MemoryCategory::Trade => "trade",
            MemoryCategory::Gift => "gift",
            MemoryCategory::Combat => "combat",
            MemoryCategory::Emotion => "emotion",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryCategory {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        MemoryCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| MemoryError::InvalidInput(format!("unknown category: {s}")))
    }
}

/// A memory after fusion ranking, as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMemory {
    #[serde(flatten)]
    pub memory: Memory,
    /// Summed RRF contribution (after any soft category penalty)
    pub fused_score: f64,
    /// Importance after time decay, floored
    pub effective_importance: f64,
    /// `fused_score * effective_importance`; the sort key
    pub final_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn memory_at(created_at: DateTime<Utc>) -> Memory {
        Memory {
            id: "m-1".to_string(),
            subject_id: "npc_blacksmith".to_string(),
            target_id: "player_1".to_string(),
            category: MemoryCategory::Gift,
            text: "The traveler gave me a rare ore".to_string(),
            vector: vec![0.0; 4],
            tags: normalize_tags(["Grateful", "gift"]),
            importance: 0.8,
            created_at,
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("trade".parse::<MemoryCategory>().unwrap(), MemoryCategory::Trade);
        assert_eq!(" Combat ".parse::<MemoryCategory>().unwrap(), MemoryCategory::Combat);
        assert_eq!(MemoryCategory::Emotion.to_string(), "emotion");
        assert!("romance".parse::<MemoryCategory>().is_err());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&MemoryCategory::Dialogue).unwrap();
        assert_eq!(json, "\"dialogue\"");
    }

    #[test]
    fn test_normalize_tags_dedups_and_sorts() {
        let tags = normalize_tags(["Trust", "anger", " trust ", ""]);
        assert_eq!(tags, vec!["anger".to_string(), "trust".to_string()]);
    }

    #[test]
    fn test_age_days_is_fractional_and_clamped() {
        let now = Utc::now();
        let m = memory_at(now - Duration::hours(36));
        assert!((m.age_days(now) - 1.5).abs() < 1e-6);

        let future = memory_at(now + Duration::hours(1));
        assert_eq!(future.age_days(now), 0.0);
    }

    #[test]
    fn test_ranked_memory_flattens_fields() {
        let ranked = RankedMemory {
            memory: memory_at(Utc::now()),
            fused_score: 0.03,
            effective_importance: 0.8,
            final_score: 0.024,
        };
        let value = serde_json::to_value(&ranked).unwrap();
        assert_eq!(value["id"], "m-1");
        assert_eq!(value["category"], "gift");
        assert!(value["final_score"].as_f64().is_some());
        assert!(ranked.memory.has_tag("GRATEFUL"));
    }
}
