use super::*;
use crate::config::{MutualIcDenominator, PoolConfig};
use proptest::prelude::*;

fn registry() -> TokenRegistry {
    TokenRegistry::with_features(["close", "volume"])
}

fn formula(registry: &TokenRegistry, text: &str) -> Formula {
    registry.parse_formula(text).unwrap()
}

fn pool(capacity: usize, lambda: f64, denominator: MutualIcDenominator) -> AlphaPool {
    AlphaPool::new(PoolConfig {
        capacity,
        lambda,
        denominator,
    })
}

fn close_to(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

/// close rises, volume is a shuffle with positive IC and almost no
/// correlation to close.
fn data() -> (FeatureData, Series) {
    let index: Vec<i64> = (0..10).collect();
    let mut features = FeatureData::new(index.clone()).unwrap();
    features
        .insert_column("close", (1..=10).map(f64::from).collect())
        .unwrap();
    features
        .insert_column(
            "volume",
            vec![6.0, 2.0, 7.0, 9.0, 1.0, 5.0, 10.0, 4.0, 8.0, 3.0],
        )
        .unwrap();
    let target = Series::new(
        index,
        vec![3.0, 1.0, 2.0, 6.0, 4.0, 5.0, 9.0, 7.0, 10.0, 8.0],
    )
    .unwrap();
    (features, target)
}

#[test]
fn test_redundant_member_evicted_on_add() {
    let registry = registry();
    let a = formula(&registry, "close");
    let b = formula(&registry, "close 5 ts_mean");
    let c = formula(&registry, "volume");

    let mut pool = pool(2, 0.1, MutualIcDenominator::Others);
    pool.cache_mutual_ic(&a, &b, 0.9);
    pool.cache_mutual_ic(&c, &a, 0.1);

    assert!(matches!(pool.add(AlphaEntry::new(a.clone(), 0.30)), AddOutcome::Inserted));
    assert!(matches!(pool.add(AlphaEntry::new(b.clone(), 0.25)), AddOutcome::Inserted));
    let outcome = pool.add(AlphaEntry::new(c.clone(), 0.20));

    // (B, C) is unknown, so B's mean runs over A alone.
    match outcome {
        AddOutcome::Evicted(entry) => {
            assert_eq!(entry.formula, b);
            assert!(close_to(entry.adjusted_ic, 0.16));
        }
        other => panic!("expected eviction, got {other:?}"),
    }
    let kept: Vec<_> = pool.entries().iter().map(|e| e.formula.clone()).collect();
    assert_eq!(kept, vec![a, c]);
    assert!(close_to(pool.entries()[0].adjusted_ic, 0.25));
    assert!(close_to(pool.entries()[1].adjusted_ic, 0.19));
}

#[test]
fn test_eviction_with_every_pair_known() {
    let registry = registry();
    let a = formula(&registry, "close");
    let b = formula(&registry, "close 5 ts_mean");
    let c = formula(&registry, "volume");

    let mut pool = pool(2, 0.3, MutualIcDenominator::Others);
    pool.cache_mutual_ic(&a, &b, 0.9);
    pool.cache_mutual_ic(&a, &c, 0.1);
    pool.cache_mutual_ic(&b, &c, 0.1);

    pool.add(AlphaEntry::new(a.clone(), 0.30));
    pool.add(AlphaEntry::new(b.clone(), 0.25));
    let outcome = pool.add(AlphaEntry::new(c.clone(), 0.20));

    // A: 0.30 - 0.3 * 0.5, B: 0.25 - 0.3 * 0.5, C: 0.20 - 0.3 * 0.1
    assert!(matches!(outcome, AddOutcome::Evicted(ref e) if e.formula == b && close_to(e.adjusted_ic, 0.10)));
    let entries = pool.entries();
    assert_eq!(entries[0].formula, c);
    assert!(close_to(entries[0].adjusted_ic, 0.17));
    assert_eq!(entries[1].formula, a);
    assert!(close_to(entries[1].adjusted_ic, 0.15));
}

#[test]
fn test_every_pair_known_at_small_lambda_keeps_redundant_pair() {
    let registry = registry();
    let a = formula(&registry, "close");
    let b = formula(&registry, "close 5 ts_mean");
    let c = formula(&registry, "volume");

    let mut pool = pool(2, 0.1, MutualIcDenominator::Others);
    pool.cache_mutual_ic(&a, &b, 0.9);
    pool.cache_mutual_ic(&a, &c, 0.1);
    pool.cache_mutual_ic(&b, &c, 0.1);

    pool.add(AlphaEntry::new(a.clone(), 0.30));
    pool.add(AlphaEntry::new(b.clone(), 0.25));
    let outcome = pool.add(AlphaEntry::new(c.clone(), 0.20));

    // A: 0.30 - 0.1 * 0.5, B: 0.25 - 0.1 * 0.5, C: 0.20 - 0.1 * 0.1
    assert!(matches!(outcome, AddOutcome::Evicted(ref e) if e.formula == c && close_to(e.adjusted_ic, 0.19)));
    let entries = pool.entries();
    assert_eq!(entries[0].formula, a);
    assert!(close_to(entries[0].adjusted_ic, 0.25));
    assert_eq!(entries[1].formula, b);
    assert!(close_to(entries[1].adjusted_ic, 0.20));
}

#[test]
fn test_pool_size_denominator_counts_self() {
    let registry = registry();
    let a = formula(&registry, "close");
    let b = formula(&registry, "close 5 ts_mean");
    let c = formula(&registry, "volume");

    let mut pool = pool(2, 0.3, MutualIcDenominator::PoolSize);
    pool.cache_mutual_ic(&a, &b, 0.9);
    pool.cache_mutual_ic(&a, &c, 0.1);
    pool.cache_mutual_ic(&b, &c, 0.1);

    pool.add(AlphaEntry::new(a.clone(), 0.30));
    pool.add(AlphaEntry::new(b.clone(), 0.25));
    let outcome = pool.add(AlphaEntry::new(c.clone(), 0.20));

    // Sums divided by 3: A 0.20, B 0.15, C 0.18.
    assert!(matches!(outcome, AddOutcome::Evicted(ref e) if e.formula == b && close_to(e.adjusted_ic, 0.15)));
    assert!(close_to(pool.entries()[0].adjusted_ic, 0.20));
    assert!(close_to(pool.entries()[1].adjusted_ic, 0.18));
}

#[test]
fn test_refresh_penalises_near_duplicate() {
    let registry = registry();
    let (features, target) = data();
    let evaluator = FormulaEvaluator::new(&registry);
    let close = formula(&registry, "close");
    let shifted = formula(&registry, "close 1 add");
    let volume = formula(&registry, "volume");

    let mut pool = pool(3, 1.0, MutualIcDenominator::Others);
    for f in [&close, &shifted, &volume] {
        pool.add(AlphaEntry::new(f.clone(), 0.0));
    }
    pool.config.capacity = 2;

    let evicted = pool.refresh(&features, &target, |f, d| evaluator.evaluate(f, d));

    // close and its shifted copy share ranks (mutual IC 1), so one of them goes
    // even though both beat volume on raw IC.
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].formula, shifted);
    assert!(evicted[0].score > 0.8);
    let kept: Vec<_> = pool.entries().iter().map(|e| e.formula.clone()).collect();
    assert_eq!(kept, vec![volume.clone(), close.clone()]);

    let ic_close = information_coefficient(features.get("close").unwrap(), &target);
    let ic_volume = information_coefficient(features.get("volume").unwrap(), &target);
    let m = pool.cached_mutual_ic(&close, &volume).unwrap();
    assert!(close_to(pool.entries()[0].adjusted_ic, ic_volume - m));
    assert!(close_to(pool.entries()[1].adjusted_ic, ic_close - (1.0 + m) / 2.0));
    assert!(close_to(pool.cached_mutual_ic(&close, &shifted).unwrap(), 1.0));
    assert!(close_to(pool.cached_ic(&volume).unwrap(), ic_volume));
}

#[test]
fn test_refresh_uses_cached_ic() {
    let registry = registry();
    let (features, target) = data();
    let evaluator = FormulaEvaluator::new(&registry);
    let close = formula(&registry, "close");

    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.cache_ic(&close, 0.42);
    pool.add(AlphaEntry::new(close, 0.0));
    pool.refresh(&features, &target, |f, d| evaluator.evaluate(f, d));

    assert!(close_to(pool.entries()[0].score, 0.42));
    assert!(close_to(pool.entries()[0].adjusted_ic, 0.42));
}

#[test]
fn test_refresh_scores_failed_formula_zero() {
    let registry = registry();
    let (features, target) = data();
    let close = formula(&registry, "close");

    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.add(AlphaEntry::new(close, 0.5));
    pool.refresh(&features, &target, |_, _| Err(FormulaError::UnknownFeature("close".into())));

    assert_eq!(pool.entries()[0].score, 0.0);
}

#[test]
fn test_duplicate_rejected() {
    let registry = registry();
    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.add(AlphaEntry::new(formula(&registry, "close"), 0.3));
    assert!(matches!(
        pool.add(AlphaEntry::new(formula(&registry, "close"), 0.9)),
        AddOutcome::Duplicate
    ));
    assert_eq!(pool.len(), 1);
    assert!(close_to(pool.entries()[0].score, 0.3));
}

#[test]
fn test_mutual_ic_symmetric_and_cached() {
    let registry = registry();
    let (features, _) = data();
    let close = formula(&registry, "close");
    let volume = formula(&registry, "volume");
    let sc = features.get("close").unwrap();
    let sv = features.get("volume").unwrap();

    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    let ab = pool.mutual_ic(&close, sc, &volume, sv);
    let ba = pool.mutual_ic(&volume, sv, &close, sc);
    assert_eq!(ab, ba);
    assert_eq!(pool.cached_mutual_ic(&volume, &close), Some(ab));

    // A cache hit wins over the signals.
    pool.cache_mutual_ic(&volume, &close, 0.5);
    assert_eq!(pool.mutual_ic(&close, sc, &volume, sv), 0.5);
}

#[test]
fn test_mutual_ic_without_overlap_is_zero() {
    let registry = registry();
    let a = formula(&registry, "close");
    let b = formula(&registry, "volume");
    let left = Series::new(vec![0, 1, 2], vec![1.0, 2.0, 3.0]).unwrap();
    let right = Series::new(vec![2, 3, 4], vec![3.0, 1.0, 2.0]).unwrap();

    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    assert_eq!(pool.mutual_ic(&a, &left, &b, &right), 0.0);
}

#[test]
fn test_score_candidate_does_not_insert() {
    let registry = registry();
    let (features, target) = data();
    let evaluator = FormulaEvaluator::new(&registry);
    let close = formula(&registry, "close");
    let shifted = formula(&registry, "close 1 add");

    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    let signal = evaluator.evaluate(&close, &features).unwrap();
    let ic = information_coefficient(&signal, &target);

    // Empty pool: no redundancy term.
    assert!(close_to(pool.score_candidate(&close, &signal, &target), ic));

    pool.add(AlphaEntry::with_signal(close.clone(), ic, signal));
    let candidate = evaluator.evaluate(&shifted, &features).unwrap();
    let reward = pool.score_candidate(&shifted, &candidate, &target);

    assert!(close_to(reward, ic - 0.1));
    assert_eq!(pool.len(), 1);
    assert!(!pool.contains(&shifted));
}

#[test]
fn test_top_orders_without_mutation() {
    let registry = registry();
    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.add(AlphaEntry::new(formula(&registry, "close"), 0.1));
    pool.add(AlphaEntry::new(formula(&registry, "volume"), 0.3));
    pool.add(AlphaEntry::new(formula(&registry, "close volume add"), 0.2));

    let top: Vec<_> = pool.top(2).iter().map(|e| e.key().to_string()).collect();
    assert_eq!(top, vec!["volume", "close volume add"]);
    assert_eq!(pool.entries()[0].key(), "close");
    assert_eq!(pool.top(10).len(), 3);
}

#[test]
fn test_snapshot_restore() {
    let registry = registry();
    let mut pool = pool(4, 0.2, MutualIcDenominator::PoolSize);
    pool.add(AlphaEntry::new(formula(&registry, "close 5 ts_mean"), 0.12));
    pool.add(AlphaEntry::new(formula(&registry, "volume abs"), 0.05));

    let json = serde_json::to_string(&pool.snapshot()).unwrap();
    let snapshot: PoolSnapshot = serde_json::from_str(&json).unwrap();
    let restored = AlphaPool::restore(&snapshot, &registry).unwrap();

    assert_eq!(restored.config(), pool.config());
    assert_eq!(restored.snapshot(), pool.snapshot());
    assert_eq!(restored.cached_ic(&formula(&registry, "volume abs")), None);
}

#[test]
fn test_restore_rejects_unknown_formula() {
    let registry = registry();
    let snapshot = PoolSnapshot {
        config: PoolConfig::default(),
        entries: vec![SnapshotEntry {
            formula: "vwap 5 ts_mean".to_string(),
            score: 0.1,
            adjusted_ic: 0.1,
        }],
    };
    assert_eq!(
        AlphaPool::restore(&snapshot, &registry).unwrap_err(),
        FormulaError::UnknownToken("vwap".to_string())
    );
}

#[test]
fn test_out_of_sample_ic() {
    let registry = registry();
    let (features, target) = data();
    let evaluator = FormulaEvaluator::new(&registry);
    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.add(AlphaEntry::new(formula(&registry, "close"), 0.9));

    let held_out = features.slice(5, 10);
    let scores = pool.out_of_sample_ic(&evaluator, &held_out, &target);
    assert_eq!(scores.len(), 1);
    let expected = information_coefficient(held_out.get("close").unwrap(), &target);
    assert!(close_to(scores[0].1, expected));
}

#[test]
fn test_invalidate_caches_drops_signals() {
    let registry = registry();
    let (features, _) = data();
    let close = formula(&registry, "close");
    let mut pool = pool(4, 0.1, MutualIcDenominator::Others);
    pool.cache_ic(&close, 0.3);
    pool.add(AlphaEntry::with_signal(
        close.clone(),
        0.3,
        features.get("close").unwrap().clone(),
    ));

    pool.invalidate_caches();
    assert_eq!(pool.cached_ic(&close), None);
    assert!(pool.entries()[0].cached_signal.is_none());
}

#[test_log::test]
fn test_eviction_keeps_best_when_penalty_off() {
    let registry = registry();
    let mut pool = pool(1, 0.0, MutualIcDenominator::Others);
    pool.add(AlphaEntry::new(formula(&registry, "close"), 0.1));
    let outcome = pool.add(AlphaEntry::new(formula(&registry, "volume"), 0.2));
    assert!(matches!(outcome, AddOutcome::Evicted(ref e) if e.key() == "close"));
    assert_eq!(pool.entries()[0].key(), "volume");
}

const FORMULAS: [&str; 12] = [
    "close",
    "volume",
    "close volume add",
    "close volume sub",
    "close volume mul",
    "close volume div",
    "close 5 ts_mean",
    "volume 5 ts_mean",
    "close 10 ts_std",
    "close abs",
    "volume neg",
    "close volume 5 ts_corr",
];

proptest! {
    #[test]
    fn prop_size_never_exceeds_capacity(
        capacity in 1usize..5,
        lambda in 0.0f64..1.0,
        adds in prop::collection::vec((0usize..FORMULAS.len(), -1.0f64..1.0), 0..30),
        pairs in prop::collection::vec((0usize..FORMULAS.len(), 0usize..FORMULAS.len(), -1.0f64..1.0), 0..20),
    ) {
        let registry = registry();
        let formulas: Vec<Formula> = FORMULAS.iter().map(|t| formula(&registry, t)).collect();
        let mut pool = pool(capacity, lambda, MutualIcDenominator::Others);
        for (i, j, value) in pairs {
            pool.cache_mutual_ic(&formulas[i], &formulas[j], value);
        }
        for (i, score) in adds {
            pool.add(AlphaEntry::new(formulas[i].clone(), score));
            prop_assert!(pool.len() <= capacity);
        }
        if pool.len() == capacity {
            let ranked = pool.entries().windows(2).all(|w| w[0].adjusted_ic >= w[1].adjusted_ic);
            // Sorted only once an eviction has happened; otherwise insertion order.
            prop_assert!(ranked || pool.entries().iter().all(|e| e.adjusted_ic == e.score));
        }
    }

    #[test]
    fn prop_mutual_ic_order_independent(
        left in prop::collection::vec(-10.0f64..10.0, 0..12),
        right in prop::collection::vec(-10.0f64..10.0, 0..12),
    ) {
        let registry = registry();
        let a = formula(&registry, "close");
        let b = formula(&registry, "volume");
        let sa = Series::from_values(left);
        let sb = Series::from_values(right);
        let mut forward = pool(2, 0.1, MutualIcDenominator::Others);
        let mut backward = pool(2, 0.1, MutualIcDenominator::Others);
        prop_assert_eq!(forward.mutual_ic(&a, &sa, &b, &sb), backward.mutual_ic(&b, &sb, &a, &sa));
    }
}
