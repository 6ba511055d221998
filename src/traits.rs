//! Traits for storage abstraction and the external classification capability

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::categorization::categorizer::Categorization;
use crate::categorization::taxonomy::Taxonomy;
use crate::types::*;

/// Storage abstraction for invoices, bank transactions and reconciliations
///
/// This trait lets the reconciliation core work with any storage backend
/// (PostgreSQL, SQLite, in-memory, etc.). Every query is scoped to one
/// company; nothing here crosses company boundaries.
#[async_trait]
pub trait ReconciliationStorage: Send + Sync {
    /// All bank transactions of a company
    async fn list_transactions(&self, company_id: &str) -> ReconResult<Vec<BankTransaction>>;

    /// Transactions with status UNMATCHED
    async fn list_unmatched_transactions(
        &self,
        company_id: &str,
    ) -> ReconResult<Vec<BankTransaction>>;

    async fn get_transaction(&self, transaction_id: &str) -> ReconResult<Option<BankTransaction>>;

    /// Write the category fields only; status is never touched
    async fn update_transaction_category(
        &self,
        transaction_id: &str,
        categorization: &Categorization,
    ) -> ReconResult<()>;

    /// All invoices of a company
    async fn list_invoices(&self, company_id: &str) -> ReconResult<Vec<Invoice>>;

    /// Invoices with outstanding_amount > 0
    async fn list_open_invoices(&self, company_id: &str) -> ReconResult<Vec<Invoice>>;

    async fn get_invoice(&self, invoice_id: &str) -> ReconResult<Option<Invoice>>;

    async fn get_counterparty(&self, counterparty_id: &str) -> ReconResult<Option<Counterparty>>;

    /// All reconciliations of a company, rejected ones included
    async fn list_reconciliations(&self, company_id: &str) -> ReconResult<Vec<Reconciliation>>;

    async fn get_reconciliation(
        &self,
        reconciliation_id: &str,
    ) -> ReconResult<Option<Reconciliation>>;

    /// The non-REJECTED reconciliation of a transaction, if any
    async fn find_active_reconciliation(
        &self,
        transaction_id: &str,
    ) -> ReconResult<Option<Reconciliation>>;

    /// Store a new PENDING reconciliation and mark its transaction MATCHED.
    ///
    /// Must fail with [`ReconError::DuplicateReconciliation`] when the
    /// transaction already has an active one.
    async fn insert_reconciliation(&self, reconciliation: &Reconciliation) -> ReconResult<()>;

    /// Atomically apply a reconciliation status change.
    ///
    /// Fails with [`ReconError::ConcurrentSettlementConflict`] if the stored
    /// version differs from `expected_version`, and with
    /// [`ReconError::InvariantViolation`] if the invoice delta would leave the
    /// outstanding amount outside `[0, original_amount]`. On any failure
    /// nothing is written.
    async fn commit_transition(&self, change: &SettlementChange) -> ReconResult<Reconciliation>;
}

/// One atomic reconciliation status change and its side effects
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementChange {
    /// The reconciliation in its new state
    pub reconciliation: Reconciliation,
    /// Version the change was computed from
    pub expected_version: u64,
    pub transaction_status: TransactionStatus,
    /// Signed change to the invoice's outstanding amount
    pub invoice_delta: Option<BigDecimal>,
}

/// What the classification capability gets to see about a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationContext {
    pub transaction_id: String,
    pub date: Option<NaiveDate>,
    pub amount: BigDecimal,
    pub direction: TransactionDirection,
    pub description: String,
    pub reference: Option<String>,
    pub is_reconciled: bool,
    pub counterparty_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_description: Option<String>,
}

/// Structured answer of the classification capability
///
/// `category_code` is unvalidated here; the categorizer checks it against
/// the taxonomy before accepting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub category_code: String,
    #[serde(default = "default_confidence")]
    pub confidence: Confidence,
    #[serde(default, alias = "reasoning")]
    pub rationale: String,
}

fn default_confidence() -> Confidence {
    Confidence::Medium
}

/// External, possibly AI-backed, transaction classifier
///
/// Implementations may be slow or nondeterministic; the categorizer wraps
/// every call in a timeout and treats any error as a degraded result for
/// that one transaction.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        context: &ClassificationContext,
        taxonomy: &Taxonomy,
    ) -> Result<ClassificationResponse, ClassificationError>;
}

/// Trait for validating ingested records before they enter a batch
pub trait RecordValidator: Send + Sync {
    /// Validate a transaction, returning its booking date
    fn validate_transaction(&self, transaction: &BankTransaction) -> ReconResult<NaiveDate>;

    /// Validate an invoice, returning its issue date
    fn validate_invoice(&self, invoice: &Invoice) -> ReconResult<NaiveDate>;
}
