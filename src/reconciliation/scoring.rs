//! Match signals and the composite fuzzy-match score
//!
//! Every signal is normalized to `[0, 1]`. Signals that only make sense
//! inside the tolerance windows return `None` outside them, which removes
//! the candidate before any score is computed.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ScoreWeights;
use crate::utils::text::{
    contains_joined_run, contains_phrase, normalize_alnum, significant_name_tokens, tokens,
};

/// Name tokens at least this long also match when glued to other text
const NAME_GLUE_MIN_LEN: usize = 5;

/// The three normalized signals behind a fuzzy match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSignals {
    pub amount: f64,
    pub date: f64,
    pub text: f64,
}

/// Closeness of a transaction amount to an invoice balance.
///
/// 1.0 for equal amounts, falling linearly to 0.0 at the edge of the
/// relative tolerance window; `None` outside the window.
pub fn amount_closeness(
    transaction_amount: &BigDecimal,
    outstanding: &BigDecimal,
    tolerance: f64,
) -> Option<f64> {
    if *outstanding <= BigDecimal::zero() {
        return None;
    }

    let diff = (transaction_amount - outstanding).abs();
    if diff.is_zero() {
        return Some(1.0);
    }

    let relative = (diff / outstanding).to_f64()?;
    if tolerance <= 0.0 || relative > tolerance {
        return None;
    }

    Some((1.0 - relative / tolerance).clamp(0.0, 1.0))
}

/// Proximity of the transaction date to the invoice date.
///
/// 1.0 on the same day, falling linearly to 0.0 at `window_days`; `None`
/// beyond the window. Payments booked before the invoice date count by
/// absolute distance.
pub fn date_proximity(
    transaction_date: NaiveDate,
    invoice_date: NaiveDate,
    window_days: i64,
) -> Option<f64> {
    let days = (transaction_date - invoice_date).num_days().abs();
    if days > window_days {
        return None;
    }
    if window_days == 0 {
        return Some(1.0);
    }

    Some(1.0 - days as f64 / window_days as f64)
}

/// Whether the invoice number occurs in the narration as whole tokens,
/// ignoring case and punctuation. Numbers shorter than `min_len` never
/// count.
pub fn reference_in_narration(invoice_number: &str, narration: &str, min_len: usize) -> bool {
    let reference = normalize_alnum(invoice_number);
    reference.chars().count() >= min_len.max(1)
        && contains_joined_run(&tokens(narration), &reference)
}

/// Whether the counterparty name, stripped of legal forms, occurs in the
/// narration as a run of whole tokens. Only long single-word names may be
/// glued to other text.
pub fn name_in_narration(name: &str, narration: &str) -> bool {
    let core = significant_name_tokens(name);
    if core.is_empty() {
        return false;
    }

    let haystack = tokens(narration);
    contains_phrase(&haystack, &core.join(" "), NAME_GLUE_MIN_LEN)
        || contains_joined_run(&haystack, &core.concat())
}

/// Fraction of the counterparty's significant name tokens found in the
/// narration
pub fn name_token_overlap(name: &str, narration: &str) -> f64 {
    let name_tokens = significant_name_tokens(name);
    if name_tokens.is_empty() {
        return 0.0;
    }

    let haystack = tokens(narration);
    let found = name_tokens
        .iter()
        .filter(|token| contains_phrase(&haystack, token, NAME_GLUE_MIN_LEN))
        .count();

    found as f64 / name_tokens.len() as f64
}

/// Textual similarity between a narration and an invoice.
///
/// A found invoice number is conclusive; otherwise the counterparty name
/// token overlap decides.
pub fn text_similarity(
    narration: &str,
    invoice_number: &str,
    counterparty_name: Option<&str>,
    min_reference_len: usize,
) -> f64 {
    if reference_in_narration(invoice_number, narration, min_reference_len) {
        return 1.0;
    }

    counterparty_name
        .map(|name| name_token_overlap(name, narration))
        .unwrap_or(0.0)
}

/// Weighted sum of the match signals, normalized by the total weight
pub fn composite_score(signals: &MatchSignals, weights: &ScoreWeights) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }

    let sum = weights.amount * signals.amount
        + weights.date * signals.date
        + weights.text * signals.text;

    (sum / total).clamp(0.0, 1.0)
}

/// Acceptance is inclusive: a score equal to the threshold passes
pub fn accepts(score: f64, threshold: f64) -> bool {
    score >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn test_amount_closeness_window() {
        assert_eq!(amount_closeness(&dec("50000"), &dec("50000"), 0.01), Some(1.0));

        let inside = amount_closeness(&dec("49800"), &dec("50000"), 0.01).unwrap();
        assert!((inside - 0.6).abs() < 1e-9);

        // exactly on the edge of the window
        assert_eq!(amount_closeness(&dec("49500"), &dec("50000"), 0.01), Some(0.0));
        assert_eq!(amount_closeness(&dec("49499.99"), &dec("50000"), 0.01), None);
        assert_eq!(amount_closeness(&dec("100"), &dec("0"), 0.01), None);
    }

    #[test]
    fn test_zero_tolerance_only_accepts_equal_amounts() {
        assert_eq!(amount_closeness(&dec("10.00"), &dec("10"), 0.0), Some(1.0));
        assert_eq!(amount_closeness(&dec("10.01"), &dec("10"), 0.0), None);
    }

    #[test]
    fn test_date_proximity_window() {
        assert_eq!(date_proximity(d(2025, 1, 10), d(2025, 1, 10), 45), Some(1.0));
        assert_eq!(date_proximity(d(2025, 2, 24), d(2025, 1, 10), 45), Some(0.0));
        assert_eq!(date_proximity(d(2025, 2, 25), d(2025, 1, 10), 45), None);
        assert_eq!(
            date_proximity(d(2025, 1, 1), d(2025, 1, 10), 45),
            date_proximity(d(2025, 1, 19), d(2025, 1, 10), 45)
        );
        assert_eq!(date_proximity(d(2025, 1, 10), d(2025, 1, 10), 0), Some(1.0));
    }

    #[test]
    fn test_reference_in_narration() {
        assert!(reference_in_narration("INV-2025-001", "NEFT CR INV2025001 ACME", 3));
        assert!(reference_in_narration("inv/77", "UPI PAYMENT INV 77", 3));
        assert!(!reference_in_narration("INV-2025-002", "NEFT CR INV2025001", 3));
        assert!(!reference_in_narration("7", "NEFT 7781", 3));
        assert!(!reference_in_narration("", "NEFT", 3));
    }

    #[test]
    fn test_reference_never_spans_word_edges() {
        assert!(!reference_in_narration("ST-100", "NEFT DR FIRST 1000 UNITS", 3));
        assert!(!reference_in_narration("INV-20", "NEFT CR INV2025001", 3));
        assert!(reference_in_narration("ST-100", "NEFT DR ST 100 UNITS", 3));
    }

    #[test]
    fn test_name_signals() {
        let name = "Sharma Steel Traders Pvt Ltd";
        assert!(name_in_narration(name, "NEFT DR SHARMA STEEL TRADERS"));
        assert!(!name_in_narration(name, "NEFT DR SHARMA STEEL"));
        assert!(!name_in_narration("Pvt Ltd", "NEFT DR PVT LTD"));
        assert!(name_in_narration("Globex Solutions", "IMPS GLOBEXSOLUTIONS 88"));

        let overlap = name_token_overlap(name, "NEFT DR SHARMA STEEL");
        assert!((overlap - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(name_token_overlap(name, "IMPS 88123"), 0.0);
    }

    #[test]
    fn test_short_name_needs_whole_token() {
        assert!(!name_in_narration("Ram Co", "NEFT CR PRAMOD KUMAR"));
        assert!(name_in_narration("Ram Co", "NEFT CR RAM 5521"));
    }

    #[test]
    fn test_text_similarity_prefers_reference() {
        let narration = "NEFT CR B-2025-14 GLOBEX";
        assert_eq!(text_similarity(narration, "B-2025-14", Some("Initech"), 3), 1.0);
        assert_eq!(text_similarity(narration, "B-2025-99", Some("Globex Corp"), 3), 1.0);
        assert_eq!(text_similarity(narration, "B-2025-99", None, 3), 0.0);
    }

    #[test]
    fn test_composite_score_is_normalized() {
        let weights = ScoreWeights::default();
        let perfect = MatchSignals {
            amount: 1.0,
            date: 1.0,
            text: 1.0,
        };
        assert!((composite_score(&perfect, &weights) - 1.0).abs() < 1e-9);

        let doubled = ScoreWeights {
            amount: 0.8,
            date: 0.4,
            text: 0.8,
        };
        let signals = MatchSignals {
            amount: 0.6,
            date: 0.5,
            text: 0.25,
        };
        assert!(
            (composite_score(&signals, &weights) - composite_score(&signals, &doubled)).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        assert!(accepts(0.6, 0.6));
        assert!(!accepts(0.599_999, 0.6));
    }

    proptest! {
        #[test]
        fn prop_score_non_increasing_in_date_distance(
            near in 0i64..=45,
            extra in 0i64..=45,
            amount in 0.0f64..=1.0,
            text in 0.0f64..=1.0,
        ) {
            let far = (near + extra).min(45);
            let invoice_date = d(2025, 1, 10);
            let weights = ScoreWeights::default();

            let score_at = |days: i64| {
                let paid_on = invoice_date + chrono::Duration::days(days);
                let date = date_proximity(paid_on, invoice_date, 45).unwrap();
                composite_score(&MatchSignals { amount, date, text }, &weights)
            };

            prop_assert!(score_at(near) >= score_at(far));
        }

        #[test]
        fn prop_amount_closeness_stays_in_unit_range(
            outstanding in 1i64..10_000_000,
            delta in -200_000i64..200_000,
        ) {
            let outstanding = BigDecimal::from(outstanding);
            let transaction = &outstanding + BigDecimal::from(delta);
            if let Some(score) = amount_closeness(&transaction, &outstanding, 0.01) {
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
