//! Fusion ranking properties
//!
//! - Reciprocal rank fusion order and tie-breaking
//! - Importance decay monotonicity
//! - Soft vs hard category filters
//! - Age filter and degraded (empty) arms

use chrono::{Duration, TimeZone, Utc};

use npc_memory::config::CategoryFilterMode;
use npc_memory::memory::MemoryCategory;
use npc_memory::ranking::{FusionQuery, FusionRanker, RankingWeights, effective_importance};
use npc_memory::testing::{hits, memory_fixture};

fn ranker(mode: CategoryFilterMode) -> FusionRanker {
    FusionRanker::new(RankingWeights::default(), mode)
}

fn ids(ranked: &[npc_memory::memory::RankedMemory]) -> Vec<&str> {
    ranked.iter().map(|r| r.memory.id.as_str()).collect()
}

#[test]
fn test_rrf_order_with_tie_breaks() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let same_time = now - Duration::hours(2);

    // A and B tie exactly on fused score and best contribution; id decides.
    // C and D tie too; the newer one wins.
    let a = memory_fixture("A", MemoryCategory::Dialogue, "a", 0.5, same_time);
    let b = memory_fixture("B", MemoryCategory::Dialogue, "b", 0.5, same_time);
    let c = memory_fixture("C", MemoryCategory::Dialogue, "c", 0.5, now - Duration::hours(1));
    let d = memory_fixture("D", MemoryCategory::Dialogue, "d", 0.5, now - Duration::hours(3));

    let lexical = hits(&[&a, &b, &c]);
    let vector = hits(&[&b, &a, &d]);

    let query = FusionQuery::new(10).at(now);
    let ranked = ranker(CategoryFilterMode::Soft).rank(&lexical, &vector, &query);

    assert_eq!(ids(&ranked), vec!["A", "B", "C", "D"]);

    let expected_ab = 1.0 / 61.0 + 1.0 / 62.0;
    assert!((ranked[0].fused_score - expected_ab).abs() < 1e-12);
    assert!((ranked[2].fused_score - 1.0 / 63.0).abs() < 1e-12);
}

#[test]
fn test_rank_is_deterministic_for_identical_input() {
    let now = Utc::now();
    let memories: Vec<_> = (0..20)
        .map(|i| {
            memory_fixture(
                &format!("m{i:02}"),
                MemoryCategory::ALL[i % MemoryCategory::ALL.len()],
                "text",
                (i as f64) / 20.0,
                now - Duration::days(i as i64),
            )
        })
        .collect();
    let refs: Vec<_> = memories.iter().collect();
    let mut reversed = refs.clone();
    reversed.reverse();

    let lexical = hits(&refs);
    let vector = hits(&reversed);
    let query = FusionQuery::new(7).at(now);
    let fusion = ranker(CategoryFilterMode::Soft);

    let first = fusion.rank(&lexical, &vector, &query);
    let second = fusion.rank(&lexical, &vector, &query);
    assert_eq!(first, second);
    assert_eq!(first.len(), 7);
}

#[test]
fn test_decay_is_monotonic_and_floored() {
    let mut previous = f64::INFINITY;
    for age in [0.0, 0.5, 1.0, 7.0, 30.0, 365.0, 5000.0] {
        let eff = effective_importance(0.8, age, 0.01, 0.2);
        assert!(eff <= previous, "decay increased at age {age}");
        assert!(eff >= 0.2);
        previous = eff;
    }
}

#[test]
fn test_older_memory_ranks_lower_at_equal_rank_position() {
    let now = Utc::now();
    let fresh = memory_fixture("fresh", MemoryCategory::Gift, "x", 0.9, now);
    let stale = memory_fixture("stale", MemoryCategory::Gift, "x", 0.9, now - Duration::days(90));

    // Each appears at rank 1 in one arm only
    let ranked = ranker(CategoryFilterMode::Soft).rank(
        &hits(&[&stale]),
        &hits(&[&fresh]),
        &FusionQuery::new(5).at(now),
    );
    assert_eq!(ids(&ranked), vec!["fresh", "stale"]);
    assert!(ranked[0].effective_importance > ranked[1].effective_importance);
}

#[test]
fn test_soft_filter_penalizes_hard_filter_excludes() {
    let now = Utc::now();
    let quest = memory_fixture("quest", MemoryCategory::Quest, "x", 0.5, now);
    let trade = memory_fixture("trade", MemoryCategory::Trade, "x", 0.5, now);
    let lexical = hits(&[&trade, &quest]);
    let vector = hits(&[&trade, &quest]);
    let categories = [MemoryCategory::Quest];

    let query = FusionQuery::new(5)
        .with_categories(Some(&categories[..]))
        .at(now);

    let soft = ranker(CategoryFilterMode::Soft).rank(&lexical, &vector, &query);
    assert_eq!(ids(&soft), vec!["quest", "trade"]);
    let unpenalized = 2.0 / 61.0;
    assert!((soft[1].fused_score - unpenalized * 0.35).abs() < 1e-12);

    let hard = ranker(CategoryFilterMode::Hard).rank(&lexical, &vector, &query);
    assert_eq!(ids(&hard), vec!["quest"]);
}

#[test]
fn test_max_age_excludes_old_memories() {
    let now = Utc::now();
    let recent = memory_fixture("recent", MemoryCategory::Emotion, "x", 0.5, now - Duration::days(1));
    let old = memory_fixture("old", MemoryCategory::Emotion, "x", 0.5, now - Duration::days(40));

    let query = FusionQuery::new(5).with_max_age_days(Some(30.0)).at(now);
    let ranked = ranker(CategoryFilterMode::Soft).rank(&hits(&[&old, &recent]), &[], &query);
    assert_eq!(ids(&ranked), vec!["recent"]);
}

#[test]
fn test_empty_arms() {
    let now = Utc::now();
    let only = memory_fixture("only", MemoryCategory::Combat, "x", 0.5, now);
    let fusion = ranker(CategoryFilterMode::Soft);
    let query = FusionQuery::new(5).at(now);

    assert!(fusion.rank(&[], &[], &query).is_empty());
    let ranked = fusion.rank(&[], &hits(&[&only]), &query);
    assert_eq!(ids(&ranked), vec!["only"]);
    assert!((ranked[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
}

#[test]
fn test_duplicate_hits_keep_first_rank() {
    let now = Utc::now();
    let a = memory_fixture("a", MemoryCategory::Dialogue, "x", 0.5, now);
    let b = memory_fixture("b", MemoryCategory::Dialogue, "x", 0.5, now);

    let ranked = ranker(CategoryFilterMode::Soft).rank(
        &hits(&[&a, &a, &b]),
        &[],
        &FusionQuery::new(5).at(now),
    );
    assert!((ranked[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
    assert!((ranked[1].fused_score - 1.0 / 62.0).abs() < 1e-12);
}
