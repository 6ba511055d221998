//! Core types and data structures for reconciliation and categorization

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::categorization::taxonomy::CategoryCode;

/// Direction of an invoice from the company's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceDirection {
    /// Issued by the company; paid by a buyer through a CREDIT
    Sales,
    /// Received from a vendor; paid by the company through a DEBIT
    Purchase,
}

impl InvoiceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "SALES",
            Self::Purchase => "PURCHASE",
        }
    }
}

/// Payment state of an invoice, derived from its outstanding amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

/// Direction of money movement on the bank statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionDirection {
    /// Money received into the account
    Credit,
    /// Money paid out of the account
    Debit,
}

impl TransactionDirection {
    /// The only invoice direction this transaction may reconcile against
    pub fn invoice_direction(&self) -> InvoiceDirection {
        match self {
            Self::Credit => InvoiceDirection::Sales,
            Self::Debit => InvoiceDirection::Purchase,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
        }
    }
}

/// Matching state of a bank transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Unmatched,
    Matched,
    Settled,
}

impl TransactionStatus {
    /// Transaction status is a pure function of its current reconciliation
    pub fn for_reconciliation(status: Option<ReconciliationStatus>) -> Self {
        match status {
            None | Some(ReconciliationStatus::Rejected) => Self::Unmatched,
            Some(ReconciliationStatus::Pending) | Some(ReconciliationStatus::Verified) => {
                Self::Matched
            }
            Some(ReconciliationStatus::Settled) => Self::Settled,
        }
    }
}

/// Confidence attached to a category assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    #[serde(alias = "low", alias = "Low")]
    Low,
    #[serde(alias = "medium", alias = "Medium")]
    Medium,
    #[serde(alias = "high", alias = "High")]
    High,
}

/// How a reconciliation was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Manual,
}

/// Lifecycle of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    Pending,
    Verified,
    Settled,
    /// Terminal; the transaction becomes eligible for a fresh match
    Rejected,
}

impl ReconciliationStatus {
    /// Anything but REJECTED occupies the transaction
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    /// Proposed or verified but not yet applied to the invoice balance
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Verified)
    }

    /// Confirmed by a person or by policy
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Verified | Self::Settled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Settled => "SETTLED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransactionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InvoiceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor or buyer referenced by invoices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: String,
    pub name: String,
}

impl Counterparty {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Sales or purchase invoice owned by a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier for the invoice
    pub id: String,
    /// Owning company; all matching is partitioned by this
    pub company_id: String,
    pub direction: InvoiceDirection,
    /// Invoice number as printed; the reference bank narrations carry
    pub invoice_number: String,
    /// Line summary from the invoice, used for category derivation
    pub description: String,
    pub original_amount: BigDecimal,
    /// Unsettled remainder; only settlement and its reversal change it
    pub outstanding_amount: BigDecimal,
    /// Missing when upstream extraction could not read the date
    pub issue_date: Option<NaiveDate>,
    pub counterparty_id: Option<String>,
    /// Classification assigned to the invoice itself, if any
    pub category_code: Option<CategoryCode>,
    pub status: InvoiceStatus,
    pub updated_at: NaiveDateTime,
}

impl Invoice {
    /// Create an unpaid invoice
    pub fn new(
        id: impl Into<String>,
        company_id: impl Into<String>,
        direction: InvoiceDirection,
        invoice_number: impl Into<String>,
        amount: BigDecimal,
        issue_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            company_id: company_id.into(),
            direction,
            invoice_number: invoice_number.into(),
            description: String::new(),
            original_amount: amount.clone(),
            outstanding_amount: amount,
            issue_date: Some(issue_date),
            counterparty_id: None,
            category_code: None,
            status: InvoiceStatus::Pending,
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_counterparty(mut self, counterparty_id: impl Into<String>) -> Self {
        self.counterparty_id = Some(counterparty_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category_code: CategoryCode) -> Self {
        self.category_code = Some(category_code);
        self
    }

    /// Open invoices still have money owed on them
    pub fn is_open(&self) -> bool {
        self.outstanding_amount > BigDecimal::zero()
    }

    /// Sum already applied through settled reconciliations
    pub fn settled_amount(&self) -> BigDecimal {
        &self.original_amount - &self.outstanding_amount
    }

    /// Apply a signed change to the outstanding balance.
    ///
    /// Settlement passes a negative delta, reversal a positive one. The
    /// balance must stay within `[0, original_amount]`; on violation the
    /// invoice is left untouched.
    pub fn apply_balance_delta(&mut self, delta: &BigDecimal) -> ReconResult<()> {
        let next = &self.outstanding_amount + delta;

        if next < BigDecimal::zero() {
            return Err(ReconError::InvariantViolation(format!(
                "invoice {} outstanding would become negative: {} + ({}) = {}",
                self.id, self.outstanding_amount, delta, next
            )));
        }

        if next > self.original_amount {
            return Err(ReconError::InvariantViolation(format!(
                "invoice {} outstanding would exceed original amount {}: {}",
                self.id, self.original_amount, next
            )));
        }

        self.outstanding_amount = next;
        self.recompute_status();
        self.updated_at = chrono::Utc::now().naive_utc();
        Ok(())
    }

    /// Derive status from the outstanding balance
    pub fn recompute_status(&mut self) {
        self.status = if self.outstanding_amount.is_zero() {
            InvoiceStatus::Paid
        } else if self.outstanding_amount < self.original_amount {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Pending
        };
    }
}

/// Bank statement line as produced by upstream ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: String,
    pub company_id: String,
    /// Missing when the statement parser could not read the date
    pub date: Option<NaiveDate>,
    /// Always positive; `direction` carries the sign
    pub amount: BigDecimal,
    pub direction: TransactionDirection,
    /// Bank narration
    pub description: String,
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub category: Option<CategoryCode>,
    pub confidence: Option<Confidence>,
    pub requires_review: bool,
    pub category_rationale: Option<String>,
}

impl BankTransaction {
    /// Create an unmatched, uncategorized transaction
    pub fn new(
        id: impl Into<String>,
        company_id: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        direction: TransactionDirection,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            company_id: company_id.into(),
            date: Some(date),
            amount,
            direction,
            description: description.into(),
            reference: None,
            status: TransactionStatus::Unmatched,
            category: None,
            confidence: None,
            requires_review: false,
            category_rationale: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Description and reference joined, the text all matching looks at
    pub fn narration(&self) -> String {
        match &self.reference {
            Some(reference) if !reference.trim().is_empty() => {
                format!("{} {}", self.description, reference)
            }
            _ => self.description.clone(),
        }
    }
}

/// Link between one bank transaction and one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: String,
    pub company_id: String,
    pub transaction_id: String,
    pub invoice_id: String,
    pub match_type: MatchType,
    pub status: ReconciliationStatus,
    /// Certainty in `[0, 1]`; 1.0 for exact and manual matches
    pub score: f64,
    /// Amount this reconciliation allocates against the invoice
    pub amount: BigDecimal,
    /// Bumped on every status change; guards concurrent transitions
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub verified_at: Option<NaiveDateTime>,
    pub settled_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
}

impl Reconciliation {
    /// Create a PENDING reconciliation with a fresh id
    pub fn new(
        company_id: impl Into<String>,
        transaction_id: impl Into<String>,
        invoice_id: impl Into<String>,
        match_type: MatchType,
        score: f64,
        amount: BigDecimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.into(),
            transaction_id: transaction_id.into(),
            invoice_id: invoice_id.into(),
            match_type,
            status: ReconciliationStatus::Pending,
            score: score.clamp(0.0, 1.0),
            amount,
            version: 0,
            created_at: chrono::Utc::now().naive_utc(),
            verified_at: None,
            settled_at: None,
            rejected_at: None,
        }
    }

    /// Copy of this reconciliation moved to `status`, with the version bumped
    pub fn transitioned(&self, status: ReconciliationStatus) -> Self {
        let now = chrono::Utc::now().naive_utc();
        let mut next = self.clone();
        next.status = status;
        next.version = self.version + 1;
        match status {
            ReconciliationStatus::Verified => next.verified_at = Some(now),
            ReconciliationStatus::Settled => next.settled_at = Some(now),
            ReconciliationStatus::Rejected => next.rejected_at = Some(now),
            ReconciliationStatus::Pending => {}
        }
        next
    }
}

/// Failures reported by the external classification capability
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationError {
    #[error("classification timed out after {0} ms")]
    Timeout(u64),
    #[error("classification capability unavailable: {0}")]
    Unavailable(String),
    #[error("classification rate limited: {0}")]
    RateLimited(String),
    #[error("malformed classification response: {0}")]
    MalformedResponse(String),
}

/// Errors that can occur in reconciliation, settlement and categorization
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid record {record_id}: {reason}")]
    DataError { record_id: String, reason: String },
    /// For callers that must have a classification. The categorizer
    /// itself degrades to UNCATEGORIZED instead of returning this.
    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(ClassificationError),
    #[error("Reconciliation {reconciliation_id} was changed concurrently (now {found})")]
    ConcurrentSettlementConflict {
        reconciliation_id: String,
        found: ReconciliationStatus,
    },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ReconciliationStatus,
        to: ReconciliationStatus,
    },
    #[error("Transaction {0} already has an active reconciliation")]
    DuplicateReconciliation(String),
    #[error("A {transaction} transaction cannot reconcile against a {invoice} invoice")]
    DirectionMismatch {
        transaction: TransactionDirection,
        invoice: InvoiceDirection,
    },
    #[error("Reconciliation not found: {0}")]
    ReconciliationNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReconError {
    /// Only a lost settle/reject race is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentSettlementConflict { .. })
    }

    pub(crate) fn data(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataError {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(amount: i64) -> Invoice {
        Invoice::new(
            "inv-1",
            "acme",
            InvoiceDirection::Sales,
            "INV-001",
            BigDecimal::from(amount),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        )
    }

    #[test]
    fn test_transaction_status_follows_reconciliation() {
        use ReconciliationStatus::*;
        assert_eq!(
            TransactionStatus::for_reconciliation(None),
            TransactionStatus::Unmatched
        );
        assert_eq!(
            TransactionStatus::for_reconciliation(Some(Pending)),
            TransactionStatus::Matched
        );
        assert_eq!(
            TransactionStatus::for_reconciliation(Some(Verified)),
            TransactionStatus::Matched
        );
        assert_eq!(
            TransactionStatus::for_reconciliation(Some(Settled)),
            TransactionStatus::Settled
        );
        assert_eq!(
            TransactionStatus::for_reconciliation(Some(Rejected)),
            TransactionStatus::Unmatched
        );
    }

    #[test]
    fn test_direction_pairing() {
        assert_eq!(
            TransactionDirection::Credit.invoice_direction(),
            InvoiceDirection::Sales
        );
        assert_eq!(
            TransactionDirection::Debit.invoice_direction(),
            InvoiceDirection::Purchase
        );
    }

    #[test]
    fn test_balance_delta_updates_status() {
        let mut inv = invoice(1000);

        inv.apply_balance_delta(&BigDecimal::from(-400)).unwrap();
        assert_eq!(inv.outstanding_amount, BigDecimal::from(600));
        assert_eq!(inv.status, InvoiceStatus::PartiallyPaid);

        inv.apply_balance_delta(&BigDecimal::from(-600)).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert!(!inv.is_open());

        inv.apply_balance_delta(&BigDecimal::from(1000)).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert_eq!(inv.settled_amount(), BigDecimal::from(0));
    }

    #[test]
    fn test_balance_delta_rejects_negative_outstanding() {
        let mut inv = invoice(1000);
        let err = inv.apply_balance_delta(&BigDecimal::from(-1001)).unwrap_err();

        assert!(matches!(err, ReconError::InvariantViolation(_)));
        assert_eq!(inv.outstanding_amount, BigDecimal::from(1000));
        assert_eq!(inv.status, InvoiceStatus::Pending);
    }

    #[test]
    fn test_balance_delta_rejects_overflow_past_original() {
        let mut inv = invoice(1000);
        assert!(inv.apply_balance_delta(&BigDecimal::from(1)).is_err());
    }

    #[test]
    fn test_transition_bumps_version_and_stamps() {
        let recon = Reconciliation::new(
            "acme",
            "txn-1",
            "inv-1",
            MatchType::Exact,
            1.0,
            BigDecimal::from(10),
        );
        let verified = recon.transitioned(ReconciliationStatus::Verified);

        assert_eq!(verified.version, recon.version + 1);
        assert!(verified.verified_at.is_some());
        assert_eq!(verified.id, recon.id);
        assert_eq!(recon.status, ReconciliationStatus::Pending);
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        let conflict = ReconError::ConcurrentSettlementConflict {
            reconciliation_id: "r".to_string(),
            found: ReconciliationStatus::Settled,
        };
        assert!(conflict.is_retryable());
        assert!(!ReconError::InvariantViolation("x".to_string()).is_retryable());
    }

    #[test]
    fn test_invoice_category_survives_json_from_owned_buffer() {
        let invoice = invoice(5000).with_category(CategoryCode::SERVICE_REVENUE);
        let json: String = serde_json::to_string(&invoice).unwrap();

        let restored: Invoice = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.category_code, Some(CategoryCode::SERVICE_REVENUE));
        assert_eq!(restored, invoice);

        let tampered = json.replace("INC-SVC-TM", "INC-BOGUS");
        assert!(serde_json::from_str::<Invoice>(&tampered).is_err());
    }
}
