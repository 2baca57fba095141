//! Match scoring against existing payments
//!
//! Each candidate with an amount and a date is scored against every payment
//! in the pool. Points are additive:
//!
//! | factor      | points |
//! |-------------|--------|
//! | amount      | exact 50, within 1.00 → 40, within 1% → 30 |
//! | date        | same day 30, ±1 day → 20, ±3 days → 10 |
//! | description | containment either way → 20 |
//! | reference   | exact → 30 |
//!
//! The total is capped at 100. The best payment is accepted only at or above
//! the threshold.

use serde::{Deserialize, Serialize};

use crate::models::{ExistingPayment, MappedData};

/// Default minimum score for an automatic match
pub const DEFAULT_MATCH_THRESHOLD: u8 = 50;

/// Maximum score, also used for manual links
pub const MAX_SCORE: u8 = 100;

/// Below this the amounts are considered identical
const EXACT_AMOUNT_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub threshold: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// Individual factors contributing to a match score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFactors {
    pub amount_points: u8,
    pub date_points: u8,
    pub description_points: u8,
    pub reference_points: u8,
    /// Absolute amount difference
    pub amount_diff: f64,
    /// Days between the candidate and payment dates
    pub days_diff: i64,
}

impl MatchFactors {
    pub fn total(&self) -> u8 {
        let sum = self.amount_points as u16
            + self.date_points as u16
            + self.description_points as u16
            + self.reference_points as u16;
        sum.min(MAX_SCORE as u16) as u8
    }
}

/// A pool payment with its score, for the manual link picker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPayment {
    pub payment: ExistingPayment,
    pub score: u8,
    pub factors: MatchFactors,
}

/// Accepted automatic match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub payment: ExistingPayment,
    pub score: u8,
}

/// Score one payment; `None` when the candidate lacks an amount or a date
pub fn score_payment(data: &MappedData, payment: &ExistingPayment) -> Option<MatchFactors> {
    let amount = data.amount?.abs();
    let date = data.date?;

    let payment_amount = payment.amount.abs();
    let amount_diff = (amount - payment_amount).abs();
    let amount_points = if amount_diff < EXACT_AMOUNT_EPSILON {
        50
    } else if amount_diff < 1.0 {
        40
    } else if amount_diff < payment_amount * 0.01 {
        30
    } else {
        0
    };

    let days_diff = (date - payment.date).num_days().abs();
    let date_points = match days_diff {
        0 => 30,
        1 => 20,
        2 | 3 => 10,
        _ => 0,
    };

    let description_points = match data.description.as_deref() {
        Some(desc) if descriptions_overlap(desc, &payment.description) => 20,
        _ => 0,
    };

    let reference_points = match (data.reference.as_deref(), payment.reference.as_deref()) {
        (Some(a), Some(b)) if !a.trim().is_empty() && a.trim() == b.trim() => 30,
        _ => 0,
    };

    Some(MatchFactors {
        amount_points,
        date_points,
        description_points,
        reference_points,
        amount_diff,
        days_diff,
    })
}

fn descriptions_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Best payment at or above the threshold; ties go to the first in pool order
pub fn find_best_match(
    data: &MappedData,
    pool: &[ExistingPayment],
    config: &MatchConfig,
) -> Option<MatchResult> {
    let mut best: Option<(&ExistingPayment, u8)> = None;
    for payment in pool {
        let score = score_payment(data, payment)?.total();
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((payment, score));
        }
    }

    best.filter(|(_, score)| *score >= config.threshold)
        .map(|(payment, score)| MatchResult {
            payment: payment.clone(),
            score,
        })
}

/// Top payments by score for manual linking, highest first
pub fn rank_candidates(
    data: &MappedData,
    pool: &[ExistingPayment],
    limit: usize,
) -> Vec<RankedPayment> {
    let mut ranked: Vec<RankedPayment> = pool
        .iter()
        .filter_map(|payment| {
            let factors = score_payment(data, payment)?;
            let score = factors.total();
            (score > 0).then(|| RankedPayment {
                payment: payment.clone(),
                score,
                factors,
            })
        })
        .collect();

    // Stable sort keeps pool order among equal scores
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn payment(id: &str, desc: &str, amount: f64, day: u32) -> ExistingPayment {
        ExistingPayment {
            id: id.to_string(),
            description: desc.to_string(),
            amount,
            date: date(2024, 1, day),
            reference: None,
        }
    }

    fn candidate(desc: &str, amount: f64, day: u32) -> MappedData {
        MappedData {
            description: Some(desc.to_string()),
            amount: Some(amount),
            date: Some(date(2024, 1, day)),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_match_scores_100() {
        let pool = vec![payment("p1", "Mercado", 100.0, 5)];
        let data = candidate("Compra no Mercado", 100.0, 5);
        let result = find_best_match(&data, &pool, &MatchConfig::default()).unwrap();
        assert_eq!(result.payment.id, "p1");
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_amount_tiers() {
        let p = payment("p", "x", 1000.0, 5);
        let score = |amount: f64| score_payment(&candidate("y", amount, 20), &p).unwrap();
        assert_eq!(score(1000.0).amount_points, 50);
        assert_eq!(score(1000.5).amount_points, 40);
        assert_eq!(score(1005.0).amount_points, 30);
        assert_eq!(score(1020.0).amount_points, 0);
        // Negative payment amounts compare by magnitude
        let negative = payment("n", "x", -1000.0, 5);
        assert_eq!(score_payment(&candidate("y", 1000.0, 5), &negative).unwrap().total(), 80);
    }

    #[test]
    fn test_date_tiers() {
        let p = payment("p", "x", 1.0, 10);
        let points = |day: u32| score_payment(&candidate("y", 500.0, day), &p).unwrap().date_points;
        assert_eq!(points(10), 30);
        assert_eq!(points(9), 20);
        assert_eq!(points(13), 10);
        assert_eq!(points(14), 0);
    }

    #[test]
    fn test_reference_and_cap() {
        let mut p = payment("p", "Mercado", 100.0, 5);
        p.reference = Some("NSU-1".into());
        let mut data = candidate("Mercado", 100.0, 5);
        data.reference = Some("NSU-1".into());
        let factors = score_payment(&data, &p).unwrap();
        assert_eq!(factors.reference_points, 30);
        assert_eq!(factors.total(), 100);
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let pool = vec![payment("p1", "Aluguel", 100.0, 20)];
        let data = candidate("Mercado", 100.0, 5);
        // amount only: 50, passes default threshold
        assert!(find_best_match(&data, &pool, &MatchConfig::default()).is_some());
        assert!(find_best_match(&data, &pool, &MatchConfig { threshold: 60 }).is_none());

        let far = candidate("Mercado", 300.0, 5);
        assert!(find_best_match(&far, &pool, &MatchConfig::default()).is_none());
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let pool = vec![payment("a", "x", 100.0, 5), payment("b", "x", 100.0, 5)];
        let data = candidate("y", 100.0, 5);
        let result = find_best_match(&data, &pool, &MatchConfig::default()).unwrap();
        assert_eq!(result.payment.id, "a");
    }

    #[test]
    fn test_missing_amount_or_date_skips() {
        let pool = vec![payment("p1", "Mercado", 100.0, 5)];
        let mut data = candidate("Mercado", 100.0, 5);
        data.date = None;
        assert!(find_best_match(&data, &pool, &MatchConfig::default()).is_none());
        assert!(rank_candidates(&data, &pool, 5).is_empty());
    }

    #[test]
    fn test_empty_description_never_overlaps() {
        let p = payment("p", "", 100.0, 5);
        let data = candidate("Mercado", 100.0, 5);
        assert_eq!(score_payment(&data, &p).unwrap().description_points, 0);
    }

    #[test]
    fn test_rank_candidates_sorted_and_limited() {
        let pool = vec![
            payment("low", "zzz", 999.0, 28),
            payment("mid", "zzz", 100.0, 20),
            payment("top", "Mercado", 100.0, 5),
            payment("mid2", "zzz", 100.0, 20),
        ];
        let data = candidate("Mercado", 100.0, 5);
        let ranked = rank_candidates(&data, &pool, 2);
        let ids: Vec<&str> = ranked.iter().map(|r| r.payment.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "mid"]);
        assert!(ranked.iter().all(|r| r.score <= MAX_SCORE));
    }
}
