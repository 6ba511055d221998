//! Batch matching of bank transactions against open invoices
//!
//! The matcher is pure: it works on an in-memory [`MatchBatch`] and returns
//! proposals. Persisting them is left to the engine, so the same batch
//! always yields the same proposals.

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::MatcherConfig;
use crate::reconciliation::scoring::*;
use crate::traits::*;
use crate::types::*;
use crate::utils::DefaultRecordValidator;

/// Everything one company's matching run looks at
#[derive(Debug, Clone, Default)]
pub struct MatchBatch {
    pub company_id: String,
    pub transactions: Vec<BankTransaction>,
    pub invoices: Vec<Invoice>,
    pub counterparties: HashMap<String, Counterparty>,
    /// Amounts held per invoice by PENDING or VERIFIED reconciliations
    pub reservations: HashMap<String, BigDecimal>,
    /// Transactions that already have an active reconciliation
    pub active_transactions: HashSet<String>,
}

impl MatchBatch {
    pub fn new(
        company_id: impl Into<String>,
        transactions: Vec<BankTransaction>,
        invoices: Vec<Invoice>,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            transactions,
            invoices,
            ..Self::default()
        }
    }

    pub fn with_counterparties(
        mut self,
        counterparties: impl IntoIterator<Item = Counterparty>,
    ) -> Self {
        self.counterparties
            .extend(counterparties.into_iter().map(|party| (party.id.clone(), party)));
        self
    }

    /// Hold back amounts of open reconciliations and mark their
    /// transactions as taken
    pub fn with_open_reconciliations<'a>(
        mut self,
        reconciliations: impl IntoIterator<Item = &'a Reconciliation>,
    ) -> Self {
        for recon in reconciliations {
            if !recon.status.is_active() {
                continue;
            }
            self.active_transactions.insert(recon.transaction_id.clone());
            if recon.status.is_open() {
                *self
                    .reservations
                    .entry(recon.invoice_id.clone())
                    .or_insert_with(BigDecimal::zero) += &recon.amount;
            }
        }
        self
    }
}

/// A reconciliation the matcher wants created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchProposal {
    pub transaction_id: String,
    pub invoice_id: String,
    pub match_type: MatchType,
    pub score: f64,
    pub amount: BigDecimal,
    /// Signals behind a fuzzy score
    pub signals: Option<MatchSignals>,
}

/// Result of planning one batch
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// In allocation order
    pub proposals: Vec<MatchProposal>,
    /// Records left out because of bad data
    pub skipped: Vec<ReconError>,
    /// Valid transactions without an acceptable invoice
    pub unmatched: Vec<String>,
}

impl MatchOutcome {
    pub fn exact_matches(&self) -> usize {
        self.count(MatchType::Exact)
    }

    pub fn fuzzy_matches(&self) -> usize {
        self.count(MatchType::Fuzzy)
    }

    fn count(&self, match_type: MatchType) -> usize {
        self.proposals
            .iter()
            .filter(|proposal| proposal.match_type == match_type)
            .count()
    }
}

/// An invoice in the working set, with its still-allocatable balance
struct OpenInvoice<'a> {
    invoice: &'a Invoice,
    date: NaiveDate,
    available: BigDecimal,
    counterparty_name: Option<&'a str>,
}

struct Candidate<'a> {
    transaction: &'a BankTransaction,
    date: NaiveDate,
    narration: String,
}

/// Pairs unmatched transactions with open invoices, exact pass first
pub struct ReconciliationMatcher {
    config: MatcherConfig,
    validator: Box<dyn RecordValidator>,
}

impl ReconciliationMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            validator: Box::new(DefaultRecordValidator),
        }
    }

    /// Create a matcher with a custom record validator
    pub fn with_validator(config: MatcherConfig, validator: Box<dyn RecordValidator>) -> Self {
        Self { config, validator }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Plan the reconciliations for one batch
    pub fn plan(&self, batch: &MatchBatch) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        let mut invoices = self.working_invoices(batch, &mut outcome.skipped);
        let mut candidates = self.candidates(batch, &mut outcome.skipped);

        invoices.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.invoice.id.cmp(&b.invoice.id)));
        candidates.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.transaction.id.cmp(&b.transaction.id))
        });

        let mut remaining = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.exact_match(&candidate, &invoices) {
                Some(idx) => {
                    let open = &mut invoices[idx];
                    open.available -= &candidate.transaction.amount;
                    outcome.proposals.push(MatchProposal {
                        transaction_id: candidate.transaction.id.clone(),
                        invoice_id: open.invoice.id.clone(),
                        match_type: MatchType::Exact,
                        score: 1.0,
                        amount: candidate.transaction.amount.clone(),
                        signals: None,
                    });
                }
                None => remaining.push(candidate),
            }
        }

        for candidate in remaining {
            match self.best_fuzzy_match(&candidate, &invoices) {
                Some((idx, score, signals)) => {
                    let open = &mut invoices[idx];
                    open.available -= &candidate.transaction.amount;
                    outcome.proposals.push(MatchProposal {
                        transaction_id: candidate.transaction.id.clone(),
                        invoice_id: open.invoice.id.clone(),
                        match_type: MatchType::Fuzzy,
                        score,
                        amount: candidate.transaction.amount.clone(),
                        signals: Some(signals),
                    });
                }
                None => outcome.unmatched.push(candidate.transaction.id.clone()),
            }
        }

        outcome
    }

    fn working_invoices<'a>(
        &self,
        batch: &'a MatchBatch,
        skipped: &mut Vec<ReconError>,
    ) -> Vec<OpenInvoice<'a>> {
        batch
            .invoices
            .iter()
            .filter(|invoice| invoice.company_id == batch.company_id)
            .filter_map(|invoice| {
                let date = match self.validator.validate_invoice(invoice) {
                    Ok(date) => date,
                    Err(error) => {
                        warn!(invoice_id = %invoice.id, error = %error, "Skipping invoice");
                        skipped.push(error);
                        return None;
                    }
                };

                let mut available = invoice.outstanding_amount.clone();
                if let Some(reserved) = batch.reservations.get(&invoice.id) {
                    available -= reserved;
                }
                if available <= BigDecimal::zero() {
                    return None;
                }

                let counterparty_name = invoice
                    .counterparty_id
                    .as_ref()
                    .and_then(|id| batch.counterparties.get(id))
                    .map(|party| party.name.as_str());

                Some(OpenInvoice {
                    invoice,
                    date,
                    available,
                    counterparty_name,
                })
            })
            .collect()
    }

    fn candidates<'a>(
        &self,
        batch: &'a MatchBatch,
        skipped: &mut Vec<ReconError>,
    ) -> Vec<Candidate<'a>> {
        batch
            .transactions
            .iter()
            .filter(|txn| txn.company_id == batch.company_id)
            .filter(|txn| txn.status == TransactionStatus::Unmatched)
            .filter(|txn| !batch.active_transactions.contains(&txn.id))
            .filter_map(|txn| match self.validator.validate_transaction(txn) {
                Ok(date) => Some(Candidate {
                    transaction: txn,
                    date,
                    narration: txn.narration(),
                }),
                Err(error) => {
                    warn!(transaction_id = %txn.id, error = %error, "Skipping transaction");
                    skipped.push(error);
                    None
                }
            })
            .collect()
    }

    /// First invoice, oldest first, whose untouched balance equals the
    /// transaction amount and whose reference or party shows up in the
    /// narration
    fn exact_match(
        &self,
        candidate: &Candidate<'_>,
        invoices: &[OpenInvoice<'_>],
    ) -> Option<usize> {
        let txn = candidate.transaction;
        invoices.iter().position(|open| {
            open.invoice.direction == txn.direction.invoice_direction()
                && open.available == open.invoice.outstanding_amount
                && txn.amount == open.invoice.outstanding_amount
                && (reference_in_narration(
                    &open.invoice.invoice_number,
                    &candidate.narration,
                    self.config.min_reference_len,
                ) || open
                    .counterparty_name
                    .is_some_and(|name| name_in_narration(name, &candidate.narration)))
        })
    }

    /// Highest-scoring acceptable invoice; on a tie the oldest invoice wins
    fn best_fuzzy_match(
        &self,
        candidate: &Candidate<'_>,
        invoices: &[OpenInvoice<'_>],
    ) -> Option<(usize, f64, MatchSignals)> {
        let txn = candidate.transaction;
        let mut best: Option<(usize, f64, MatchSignals)> = None;

        for (idx, open) in invoices.iter().enumerate() {
            if open.invoice.direction != txn.direction.invoice_direction() {
                continue;
            }

            // Settling more than the invoice still has available would drive
            // the outstanding amount negative.
            if txn.amount > open.available {
                continue;
            }

            let Some(amount) =
                amount_closeness(&txn.amount, &open.available, self.config.amount_tolerance)
            else {
                continue;
            };
            let Some(date) =
                date_proximity(candidate.date, open.date, self.config.date_window_days)
            else {
                continue;
            };
            let text = text_similarity(
                &candidate.narration,
                &open.invoice.invoice_number,
                open.counterparty_name,
                self.config.min_reference_len,
            );

            let signals = MatchSignals { amount, date, text };
            let score = composite_score(&signals, &self.config.weights);

            debug!(
                transaction_id = %txn.id,
                invoice_id = %open.invoice.id,
                score,
                amount,
                date,
                text,
                "Scored fuzzy candidate"
            );

            if !accepts(score, self.config.acceptance_threshold) {
                continue;
            }

            if best.as_ref().is_none_or(|(_, best_score, _)| score > *best_score) {
                best = Some((idx, score, signals));
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sales(id: &str, number: &str, amount: i64, date: NaiveDate) -> Invoice {
        Invoice::new(
            id,
            "acme",
            InvoiceDirection::Sales,
            number,
            BigDecimal::from(amount),
            date,
        )
    }

    fn purchase(id: &str, number: &str, amount: i64, date: NaiveDate) -> Invoice {
        Invoice::new(
            id,
            "acme",
            InvoiceDirection::Purchase,
            number,
            BigDecimal::from(amount),
            date,
        )
    }

    fn credit(id: &str, amount: i64, date: NaiveDate, narration: &str) -> BankTransaction {
        BankTransaction::new(
            id,
            "acme",
            date,
            BigDecimal::from(amount),
            TransactionDirection::Credit,
            narration,
        )
    }

    fn debit(id: &str, amount: i64, date: NaiveDate, narration: &str) -> BankTransaction {
        BankTransaction::new(
            id,
            "acme",
            date,
            BigDecimal::from(amount),
            TransactionDirection::Debit,
            narration,
        )
    }

    fn matcher() -> ReconciliationMatcher {
        ReconciliationMatcher::new(MatcherConfig::default())
    }

    #[test]
    fn test_exact_match_on_reference() {
        let batch = MatchBatch::new(
            "acme",
            vec![credit("t1", 118_000, d(2025, 1, 12), "NEFT CR INV-2025-001 ACME")],
            vec![sales("i1", "INV-2025-001", 118_000, d(2025, 1, 10))],
        );

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.proposals.len(), 1);
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.match_type, MatchType::Exact);
        assert_eq!(proposal.score, 1.0);
        assert_eq!(proposal.invoice_id, "i1");
    }

    #[test]
    fn test_exact_match_on_counterparty_name() {
        let batch = MatchBatch::new(
            "acme",
            vec![credit("t1", 5_000, d(2025, 1, 12), "IMPS GLOBEX SOLUTIONS 8812")],
            vec![sales("i1", "S-9", 5_000, d(2025, 1, 2)).with_counterparty("c1")],
        )
        .with_counterparties([Counterparty::new("c1", "Globex Solutions Pvt Ltd")]);

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.exact_matches(), 1);
    }

    #[test]
    fn test_equal_amount_without_corroboration_is_not_exact() {
        let batch = MatchBatch::new(
            "acme",
            vec![credit("t1", 5_000, d(2025, 1, 12), "IMPS CR 8812")],
            vec![sales("i1", "S-9", 5_000, d(2025, 1, 10))],
        );

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.exact_matches(), 0);
        // amount 1.0 and date 0.955 without text stays under the threshold
        assert_eq!(outcome.fuzzy_matches(), 0);
        assert_eq!(outcome.unmatched, vec!["t1".to_string()]);
    }

    #[test]
    fn test_fragments_inside_other_words_do_not_corroborate() {
        let batch = MatchBatch::new(
            "acme",
            vec![
                credit("t1", 5_000, d(2025, 1, 12), "NEFT CR PRAMOD KUMAR"),
                debit("t2", 5_000, d(2025, 1, 12), "NEFT DR FIRST 1000 UNITS"),
            ],
            vec![
                sales("i1", "S-9", 5_000, d(2025, 1, 2)).with_counterparty("c1"),
                purchase("i2", "ST-100", 5_000, d(2025, 1, 2)),
            ],
        )
        .with_counterparties([Counterparty::new("c1", "Ram Co")]);

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.exact_matches(), 0);
        assert_eq!(outcome.fuzzy_matches(), 0);
        assert_eq!(outcome.unmatched, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn test_direction_partitioning() {
        let batch = MatchBatch::new(
            "acme",
            vec![debit("t1", 118_000, d(2025, 1, 12), "NEFT DR INV-2025-001")],
            vec![sales("i1", "INV-2025-001", 118_000, d(2025, 1, 10))],
        );

        let outcome = matcher().plan(&batch);
        assert!(outcome.proposals.is_empty());
    }

    #[test]
    fn test_fuzzy_match_on_vendor_fragment() {
        let batch = MatchBatch::new(
            "acme",
            vec![debit("t1", 49_800, d(2025, 2, 3), "NEFT DR SHARMA STEEL 44120")],
            vec![purchase("i1", "B-77", 50_000, d(2025, 1, 14)).with_counterparty("v1")],
        )
        .with_counterparties([Counterparty::new("v1", "Sharma Steel Traders Pvt Ltd")]);

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.fuzzy_matches(), 1);
        let proposal = &outcome.proposals[0];
        assert!(proposal.score >= 0.6);
        assert!(proposal.score < 1.0);
        assert!(proposal.signals.is_some());
    }

    #[test]
    fn test_fifo_tie_break() {
        let batch = MatchBatch::new(
            "acme",
            vec![credit("t1", 20_000, d(2025, 3, 1), "NEFT CR INITECH")],
            vec![
                sales("i-new", "S-2", 20_000, d(2025, 2, 20)).with_counterparty("b1"),
                sales("i-old", "S-1", 20_000, d(2025, 2, 10)).with_counterparty("b1"),
            ],
        )
        .with_counterparties([Counterparty::new("b1", "Initech")]);

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].invoice_id, "i-old");
        assert_eq!(outcome.proposals[0].match_type, MatchType::Exact);
    }

    #[test]
    fn test_fuzzy_highest_score_wins_over_age() {
        let batch = MatchBatch::new(
            "acme",
            vec![debit("t1", 9_950, d(2025, 3, 1), "NEFT DR B-552")],
            vec![
                purchase("i-old", "B-551", 10_000, d(2025, 2, 1)),
                purchase("i-new", "B-552", 10_000, d(2025, 2, 25)),
            ],
        );

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.proposals[0].invoice_id, "i-new");
    }

    #[test]
    fn test_reserved_balance_is_not_double_allocated() {
        let batch = MatchBatch::new(
            "acme",
            vec![
                credit("t1", 10_000, d(2025, 1, 5), "NEFT CR INV-9"),
                credit("t2", 10_000, d(2025, 1, 6), "NEFT CR INV-9"),
            ],
            vec![sales("i1", "INV-9", 10_000, d(2025, 1, 1))],
        );

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].transaction_id, "t1");
        assert_eq!(outcome.unmatched, vec!["t2".to_string()]);
    }

    #[test]
    fn test_open_reconciliations_reserve_balance() {
        let existing = Reconciliation::new(
            "acme",
            "t0",
            "i1",
            MatchType::Fuzzy,
            0.7,
            BigDecimal::from(4_000),
        );
        let batch = MatchBatch::new(
            "acme",
            vec![credit("t1", 10_000, d(2025, 1, 5), "NEFT CR INV-9")],
            vec![sales("i1", "INV-9", 10_000, d(2025, 1, 1))],
        )
        .with_open_reconciliations([&existing]);

        let outcome = matcher().plan(&batch);
        assert!(outcome.proposals.is_empty());
        assert_eq!(batch.reservations["i1"], BigDecimal::from(4_000));
    }

    #[test]
    fn test_bad_records_are_skipped() {
        let mut undated = credit("t-bad", 100, d(2025, 1, 5), "NEFT CR INV-1");
        undated.date = None;
        let mut broken = sales("i-bad", "INV-2", 100, d(2025, 1, 1));
        broken.original_amount = BigDecimal::from(0);

        let batch = MatchBatch::new(
            "acme",
            vec![undated, credit("t1", 100, d(2025, 1, 5), "NEFT CR INV-1")],
            vec![broken, sales("i1", "INV-1", 100, d(2025, 1, 1))],
        );

        let outcome = matcher().plan(&batch);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.exact_matches(), 1);
    }

    #[test]
    fn test_already_matched_transactions_are_left_alone() {
        let mut matched = credit("t1", 100, d(2025, 1, 5), "NEFT CR INV-1");
        matched.status = TransactionStatus::Matched;

        let batch = MatchBatch::new(
            "acme",
            vec![matched],
            vec![sales("i1", "INV-1", 100, d(2025, 1, 1))],
        );

        assert!(matcher().plan(&batch).proposals.is_empty());
    }

    #[test]
    fn test_outside_windows_is_no_candidate() {
        let batch = MatchBatch::new(
            "acme",
            vec![
                debit("t-late", 10_000, d(2025, 4, 1), "NEFT DR B-1"),
                debit("t-off", 9_000, d(2025, 1, 20), "NEFT DR B-1"),
            ],
            vec![purchase("i1", "B-1", 10_000, d(2025, 1, 15))],
        );

        let outcome = matcher().plan(&batch);
        assert!(outcome.proposals.is_empty());
        assert_eq!(outcome.unmatched.len(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_planning_is_deterministic() {
        let transactions = vec![
            credit("t2", 1_000, d(2025, 1, 5), "NEFT CR INV-1"),
            credit("t1", 1_000, d(2025, 1, 5), "NEFT CR INV-1"),
        ];
        let batch = MatchBatch::new(
            "acme",
            transactions,
            vec![sales("i1", "INV-1", 1_000, d(2025, 1, 1))],
        );

        let first = matcher().plan(&batch);
        let second = matcher().plan(&batch);
        assert_eq!(first.proposals, second.proposals);
        assert_eq!(first.proposals[0].transaction_id, "t1");
    }
}
