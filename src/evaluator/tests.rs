use super::*;
use crate::token::{PartialState, RpnValidator};
use proptest::prelude::*;

fn registry() -> TokenRegistry {
    TokenRegistry::with_features(["close", "volume", "gap"])
}

fn data() -> FeatureData {
    let mut data = FeatureData::new((0..8).collect()).unwrap();
    data.insert_column("close", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])
        .unwrap();
    data.insert_column("volume", vec![8.0, 6.0, 7.0, 5.0, 3.0, 4.0, 2.0, 1.0])
        .unwrap();
    // Shares no timestamps with the primary index.
    data.insert_series(
        "gap",
        Series::new(vec![100, 101, 102], vec![1.0, 2.0, 3.0]).unwrap(),
    );
    data
}

fn eval(text: &str) -> Result<Series, EvaluationError> {
    let registry = registry();
    let formula = registry.parse_formula(text).unwrap();
    FormulaEvaluator::new(&registry).try_evaluate(&formula, &data())
}

fn assert_values(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if e.is_nan() {
            assert!(a.is_nan(), "index {i}: expected NaN, got {a}");
        } else {
            assert!((a - e).abs() < 1e-9, "index {i}: expected {e}, got {a}");
        }
    }
}

#[test]
fn test_feature_passthrough() {
    let signal = eval("close").unwrap();
    assert_eq!(signal.index(), data().index());
    assert_eq!(signal.values()[7], 8.0);
}

#[test]
fn test_ts_mean_window() {
    let signal = eval("close 5 ts_mean").unwrap();
    let nan = f64::NAN;
    assert_values(signal.values(), &[nan, nan, nan, nan, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_ref_and_delta() {
    let nan = f64::NAN;
    let lagged = eval("close 1 ref").unwrap();
    assert_values(lagged.values(), &[nan, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let delta = eval("close 5 ts_delta").unwrap();
    assert_values(delta.values(), &[nan, nan, nan, nan, nan, 5.0, 5.0, 5.0]);
}

#[test]
fn test_arithmetic_with_scalar() {
    let signal = eval("close 10 div").unwrap();
    assert!((signal.values()[4] - 0.5).abs() < 1e-12);
    let sum = eval("close volume add").unwrap();
    assert_values(sum.values(), &[9.0, 8.0, 10.0, 9.0, 8.0, 10.0, 9.0, 9.0]);
}

#[test]
fn test_ts_corr_against_self_is_one() {
    let signal = eval("close close 5 ts_corr").unwrap();
    assert!(signal.values()[..4].iter().all(|v| v.is_nan()));
    for v in &signal.values()[4..] {
        assert!((v - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_ts_rank_of_increasing_series_is_top() {
    let signal = eval("close 5 ts_rank").unwrap();
    for v in &signal.values()[4..] {
        assert!((v - 1.0).abs() < 1e-12, "got {v}");
    }
}

#[test]
fn test_log_of_non_positive_is_undefined() {
    let signal = eval("close 5 sub log").unwrap();
    assert!(signal.values()[0].is_nan());
    assert!((signal.values()[7] - 3.0_f64.ln()).abs() < 1e-12);
}

#[test]
fn test_unaligned_operands() {
    assert_eq!(
        eval("close gap add").unwrap_err(),
        EvaluationError::Unaligned("add".to_string())
    );

    let registry = registry();
    let formula = registry.parse_formula("close gap add").unwrap();
    let signal = FormulaEvaluator::new(&registry)
        .evaluate(&formula, &data())
        .unwrap();
    assert_eq!(signal.index(), data().index());
    assert!(!signal.has_finite());
}

#[test]
fn test_window_longer_than_data_is_non_finite() {
    assert_eq!(
        eval("close 40 ts_mean").unwrap_err(),
        EvaluationError::NonFinite("ts_mean".to_string())
    );
}

#[test]
fn test_unknown_feature_is_formula_error() {
    let mut registry = registry();
    registry.register(crate::token::Token::feature("vwap"));
    let formula = registry.parse_formula("vwap 5 ts_mean").unwrap();
    let err = FormulaEvaluator::new(&registry)
        .evaluate(&formula, &data())
        .unwrap_err();
    assert_eq!(err, FormulaError::UnknownFeature("vwap".to_string()));
}

proptest! {
    /// Terminal states accepted by the validator evaluate without a formula error.
    #[test]
    fn prop_terminal_formulas_evaluate(choices in prop::collection::vec(any::<prop::sample::Index>(), 1..20)) {
        let registry = TokenRegistry::with_features(["close", "volume"]);
        let validator = RpnValidator::new(10);
        let mut state = PartialState::new();
        for choice in choices {
            let legal: Vec<_> = validator
                .legal_actions(&registry, &state)
                .into_iter()
                .filter(|&id| id != registry.end())
                .collect();
            if legal.is_empty() {
                break;
            }
            let pick = legal[choice.index(legal.len())];
            state.push(pick, registry.get(pick).unwrap());
        }
        if validator.is_terminal(&state) {
            let formula = Formula::from_state(&state, &registry).unwrap();
            let result = FormulaEvaluator::new(&registry).evaluate(&formula, &data());
            prop_assert!(result.is_ok(), "{}: {:?}", formula, result);
        }
    }
}
