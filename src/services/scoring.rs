//! Pure arithmetic behind the student aggregates.

use chrono::NaiveDate;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Unrounded mean of the ledger, 0 when empty.
pub fn mean_score(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Value persisted as `overall_score`.
pub fn aggregate_score(scores: &[f64]) -> f64 {
    round_to(mean_score(scores), 2)
}

/// Scores at or above the threshold count as mastered.
pub fn mastered_count(scores: &[f64], threshold: f64) -> i64 {
    scores.iter().filter(|score| **score >= threshold).count() as i64
}

/// 1-based program week containing `today`, or `None` before the program starts.
pub fn week_number(start: NaiveDate, today: NaiveDate) -> Option<i64> {
    let days = (today - start).num_days();
    let week = days.div_euclid(7) + 1;
    (week >= 1).then_some(week)
}

pub fn validate_score(score: f64) -> Result<f64, String> {
    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(format!(
            "Score must be between {MIN_SCORE} and {MAX_SCORE}, got {score}"
        ));
    }
    Ok(round_to(score, 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sample_student_aggregates() {
        let scores = [92.0, 88.0, 85.0, 80.0, 90.0];
        assert_eq!(aggregate_score(&scores), 87.0);
        assert_eq!(mastered_count(&scores, 80.0), 5);

        let scores = [92.0, 88.0, 85.0, 79.99, 90.0];
        assert_eq!(mastered_count(&scores, 80.0), 4);
    }

    #[test]
    fn empty_ledger_is_zero() {
        assert_eq!(aggregate_score(&[]), 0.0);
        assert_eq!(mastered_count(&[], 80.0), 0);
    }

    #[test]
    fn aggregate_rounds_to_two_places() {
        assert_eq!(aggregate_score(&[70.0, 80.0, 81.0]), 77.0);
        assert_eq!(aggregate_score(&[10.0, 10.0, 11.0]), 10.33);
        assert_eq!(aggregate_score(&[10.0, 11.0, 11.0]), 10.67);
    }

    #[test]
    fn week_number_counts_from_one() {
        let start = date(2026, 1, 5);
        assert_eq!(week_number(start, start), Some(1));
        assert_eq!(week_number(start, date(2026, 1, 11)), Some(1));
        assert_eq!(week_number(start, date(2026, 1, 12)), Some(2));
        assert_eq!(week_number(start, date(2026, 3, 2)), Some(9));
    }

    #[test]
    fn week_number_before_start_is_none() {
        assert_eq!(week_number(date(2026, 1, 5), date(2026, 1, 4)), None);
    }

    #[test]
    fn scores_outside_range_are_rejected() {
        assert!(validate_score(-0.5).is_err());
        assert!(validate_score(100.01).is_err());
        assert!(validate_score(f64::NAN).is_err());
        assert_eq!(validate_score(80.0), Ok(80.0));
    }
}
