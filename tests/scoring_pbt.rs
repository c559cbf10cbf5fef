//! Property tests for the aggregate arithmetic.
//!
//! - overall score stays inside the ledger's range and within rounding of the mean
//! - mastery counts are bounded by the ledger and shrink as the threshold rises
//! - program weeks start at 1 and are undefined before the start date

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use capsule_backend::services::scoring::{
    aggregate_score, mastered_count, mean_score, validate_score, week_number, MAX_SCORE,
    MIN_SCORE,
};

const ROUNDING: f64 = 0.005 + 1e-9;

fn arb_score() -> impl Strategy<Value = f64> {
    (0u32..=10_000u32).prop_map(|v| f64::from(v) / 100.0)
}

fn arb_ledger() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_score(), 0..24)
}

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

proptest! {
    #[test]
    fn aggregate_is_rounded_mean(scores in arb_ledger()) {
        let aggregate = aggregate_score(&scores);
        prop_assert!((aggregate - mean_score(&scores)).abs() <= ROUNDING);
        prop_assert!((aggregate * 100.0 - (aggregate * 100.0).round()).abs() < 1e-6);
    }

    #[test]
    fn aggregate_stays_within_ledger_range(scores in prop::collection::vec(arb_score(), 1..24)) {
        let lo = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let aggregate = aggregate_score(&scores);
        prop_assert!(aggregate >= lo - ROUNDING);
        prop_assert!(aggregate <= hi + ROUNDING);
    }

    #[test]
    fn mastered_is_bounded_and_monotone(
        scores in arb_ledger(),
        low in arb_score(),
        high in arb_score(),
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let at_low = mastered_count(&scores, low);
        let at_high = mastered_count(&scores, high);
        prop_assert!(at_low as usize <= scores.len());
        prop_assert!(at_high <= at_low);
    }

    #[test]
    fn uniform_ledger_is_fully_mastered(score in 80u32..=100u32, len in 1usize..12) {
        let scores = vec![f64::from(score); len];
        prop_assert_eq!(mastered_count(&scores, 80.0), len as i64);
        prop_assert_eq!(aggregate_score(&scores), f64::from(score));
    }

    #[test]
    fn week_number_follows_elapsed_days(days in 0i64..2_000) {
        let today = start() + Duration::days(days);
        prop_assert_eq!(week_number(start(), today), Some(days / 7 + 1));
    }

    #[test]
    fn no_week_before_start(days in 1i64..2_000) {
        let today = start() - Duration::days(days);
        prop_assert_eq!(week_number(start(), today), None);
    }

    #[test]
    fn validated_scores_stay_in_range(raw in -50.0f64..150.0) {
        match validate_score(raw) {
            Ok(score) => {
                prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&raw));
                prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
            }
            Err(_) => prop_assert!(!(MIN_SCORE..=MAX_SCORE).contains(&raw)),
        }
    }
}
