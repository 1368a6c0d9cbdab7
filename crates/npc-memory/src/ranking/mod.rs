//! Fusion ranking over lexical and vector hit lists
//!
//! Reciprocal rank fusion merges the two arms, then a time-decayed importance
//! reweights each candidate:
//!
//! ```text
//! fused(id)            = sum over arms containing id of weight_arm / (rrf_k + rank_arm)
//! effective_importance = max(importance_floor, importance * exp(-decay_lambda * age_days))
//! final                = fused * effective_importance
//! ```
//!
//! Ranks start at 1. Ordering is total: final score, then best single-arm
//! contribution, then newer `created_at`, then id.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CategoryFilterMode;
use crate::index::Hit;
use crate::memory::{Memory, MemoryCategory, RankedMemory};

/// Candidates fetched per arm for every requested result
pub const CANDIDATE_MULTIPLIER: usize = 8;

/// Parameters of a single fusion pass; immutable per search call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub rrf_k: f64,
    pub decay_lambda: f64,
    pub importance_floor: f64,
    pub category_mismatch_penalty: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            decay_lambda: 0.01,
            importance_floor: 0.2,
            category_mismatch_penalty: 0.35,
            lexical_weight: 1.0,
            vector_weight: 1.0,
        }
    }
}

/// Importance after exponential time decay, never below `floor`
pub fn effective_importance(importance: f64, age_days: f64, lambda: f64, floor: f64) -> f64 {
    let decayed = importance * (-lambda * age_days.max(0.0)).exp();
    decayed.max(floor)
}

/// Hits to request from each arm: `min(max(top_k * 8, top_k), pool_max)`, at least 1
pub fn candidate_pool(top_k: usize, pool_max: usize) -> usize {
    top_k
        .saturating_mul(CANDIDATE_MULTIPLIER)
        .max(top_k)
        .min(pool_max)
        .max(1)
}

/// Per-query inputs to fusion
#[derive(Debug, Clone)]
pub struct FusionQuery<'a> {
    pub top_k: usize,
    pub categories: Option<&'a [MemoryCategory]>,
    pub max_age_days: Option<f64>,
    pub now: DateTime<Utc>,
}

impl<'a> FusionQuery<'a> {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            categories: None,
            max_age_days: None,
            now: Utc::now(),
        }
    }

    pub fn with_categories(mut self, categories: Option<&'a [MemoryCategory]>) -> Self {
        self.categories = categories.filter(|c| !c.is_empty());
        self
    }

    pub fn with_max_age_days(mut self, days: Option<f64>) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

struct Candidate {
    memory: Memory,
    fused: f64,
    best_contribution: f64,
}

/// Merges ranked arms into a single top-K list
#[derive(Debug, Clone)]
pub struct FusionRanker {
    weights: RankingWeights,
    filter_mode: CategoryFilterMode,
}

impl FusionRanker {
    pub fn new(weights: RankingWeights, filter_mode: CategoryFilterMode) -> Self {
        Self {
            weights,
            filter_mode,
        }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    pub fn filter_mode(&self) -> CategoryFilterMode {
        self.filter_mode
    }

    /// Fuse both arms. Either list may be empty (a degraded arm contributes nothing).
    pub fn rank(&self, lexical: &[Hit], vector: &[Hit], query: &FusionQuery<'_>) -> Vec<RankedMemory> {
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        self.accumulate(&mut candidates, lexical, self.weights.lexical_weight);
        self.accumulate(&mut candidates, vector, self.weights.vector_weight);

        let mut ranked: Vec<(RankedMemory, f64)> = candidates
            .into_values()
            .filter(|c| self.passes_hard_filters(&c.memory, query))
            .map(|c| {
                let mut fused = c.fused;
                if self.is_soft_mismatch(&c.memory, query) {
                    fused *= self.weights.category_mismatch_penalty;
                }
                let eff = effective_importance(
                    c.memory.importance,
                    c.memory.age_days(query.now),
                    self.weights.decay_lambda,
                    self.weights.importance_floor,
                );
                let ranked = RankedMemory {
                    fused_score: fused,
                    effective_importance: eff,
                    final_score: fused * eff,
                    memory: c.memory,
                };
                (ranked, c.best_contribution)
            })
            .collect();

        ranked.sort_by(|(a, a_best), (b, b_best)| compare(a, *a_best, b, *b_best));
        ranked.truncate(query.top_k);
        ranked.into_iter().map(|(r, _)| r).collect()
    }

    fn accumulate(&self, candidates: &mut HashMap<String, Candidate>, hits: &[Hit], weight: f64) {
        let mut seen = HashSet::new();
        let mut rank = 0usize;
        for hit in hits {
            // A repeated id keeps its first (best) rank within the arm
            if !seen.insert(hit.id.as_str()) {
                continue;
            }
            rank += 1;
            let contribution = weight / (self.weights.rrf_k + rank as f64);

            candidates
                .entry(hit.id.clone())
                .and_modify(|c| {
                    c.fused += contribution;
                    c.best_contribution = c.best_contribution.max(contribution);
                })
                .or_insert_with(|| Candidate {
                    memory: hit.memory.clone(),
                    fused: contribution,
                    best_contribution: contribution,
                });
        }
    }

    fn passes_hard_filters(&self, memory: &Memory, query: &FusionQuery<'_>) -> bool {
        if query
            .max_age_days
            .is_some_and(|max_age| memory.age_days(query.now) > max_age)
        {
            return false;
        }
        match (self.filter_mode, query.categories) {
            (CategoryFilterMode::Hard, Some(categories)) => categories.contains(&memory.category),
            _ => true,
        }
    }

    fn is_soft_mismatch(&self, memory: &Memory, query: &FusionQuery<'_>) -> bool {
        match (self.filter_mode, query.categories) {
            (CategoryFilterMode::Soft, Some(categories)) => !categories.contains(&memory.category),
            _ => false,
        }
    }
}

fn compare(a: &RankedMemory, a_best: f64, b: &RankedMemory, b_best: f64) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| b_best.total_cmp(&a_best))
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}
