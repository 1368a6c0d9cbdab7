//! Filter criteria shared by both search arms

use chrono::{DateTime, Duration, Utc};

use crate::memory::{Memory, MemoryCategory};

/// Filter applied inside the index before ranking.
///
/// `subject_id` and `target_id` are always required; the remaining fields are
/// optional and combined with AND logic.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub subject_id: String,
    pub target_id: String,
    /// Hard category restriction (OR within the list)
    pub categories: Option<Vec<MemoryCategory>>,
    /// Only memories created at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn new(subject_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            target_id: target_id.into(),
            categories: None,
            since: None,
        }
    }

    /// Restrict to categories; an empty list means no restriction
    pub fn with_categories(mut self, categories: Vec<MemoryCategory>) -> Self {
        self.categories = if categories.is_empty() {
            None
        } else {
            Some(categories)
        };
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Convert a fractional day count into a `since` bound relative to `now`
    pub fn within_days(self, days: f64, now: DateTime<Utc>) -> Self {
        let millis = (days.max(0.0) * 86_400_000.0).min(i64::MAX as f64) as i64;
        let since = Duration::try_milliseconds(millis)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.since(since)
    }

    pub fn matches(&self, memory: &Memory) -> bool {
        if memory.subject_id != self.subject_id || memory.target_id != self.target_id {
            return false;
        }
        if let Some(ref categories) = self.categories {
            if !categories.contains(&memory.category) {
                return false;
            }
        }
        match self.since {
            Some(since) => memory.created_at >= since,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn memory(category: MemoryCategory, days_ago: i64) -> Memory {
        Memory {
            id: "m".to_string(),
            subject_id: "npc_a".to_string(),
            target_id: "player_b".to_string(),
            category,
            text: "hello".to_string(),
            vector: Vec::new(),
            tags: Vec::new(),
            importance: 0.5,
            created_at: Utc::now() - Duration::days(days_ago),
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn test_subject_and_target_must_match() {
        let filter = SearchFilter::new("npc_a", "player_b");
        assert!(filter.matches(&memory(MemoryCategory::Dialogue, 0)));
        assert!(!SearchFilter::new("npc_a", "player_c").matches(&memory(MemoryCategory::Dialogue, 0)));
    }

    #[test]
    fn test_category_restriction() {
        let filter = SearchFilter::new("npc_a", "player_b").with_categories(vec![MemoryCategory::Gift]);
        assert!(filter.matches(&memory(MemoryCategory::Gift, 0)));
        assert!(!filter.matches(&memory(MemoryCategory::Combat, 0)));

        let open = SearchFilter::new("npc_a", "player_b").with_categories(Vec::new());
        assert!(open.categories.is_none());
    }

    #[test]
    fn test_within_days() {
        let filter = SearchFilter::new("npc_a", "player_b").within_days(7.0, Utc::now());
        assert!(filter.matches(&memory(MemoryCategory::Quest, 3)));
        assert!(!filter.matches(&memory(MemoryCategory::Quest, 10)));

        let huge = SearchFilter::new("npc_a", "player_b").within_days(f64::MAX, Utc::now());
        assert!(huge.matches(&memory(MemoryCategory::Quest, 10_000)));
    }
}
