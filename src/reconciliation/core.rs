//! Main reconciliation orchestrator that coordinates matching, settlement
//! and categorization

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::categorization::{CategorySource, Categorization, InvoiceContext, TransactionCategorizer};
use crate::config::ReconConfig;
use crate::reconciliation::matcher::{MatchBatch, ReconciliationMatcher};
use crate::reconciliation::settlement::{BulkSettlementSummary, SettlementManager};
use crate::traits::*;
use crate::types::*;

/// Main reconciliation system over one storage backend
pub struct ReconciliationEngine<S: ReconciliationStorage> {
    storage: S,
    config: ReconConfig,
    matcher: ReconciliationMatcher,
    categorizer: TransactionCategorizer,
    settlement: SettlementManager<S>,
}

impl<S: ReconciliationStorage + Clone> ReconciliationEngine<S> {
    /// Create an engine with the default policy
    pub fn new(storage: S) -> Self {
        let config = ReconConfig::default();
        Self {
            matcher: ReconciliationMatcher::new(config.matcher.clone()),
            categorizer: TransactionCategorizer::new(config.categorizer.clone()),
            settlement: SettlementManager::new(storage.clone()),
            storage,
            config,
        }
    }

    /// Create an engine with a custom policy
    pub fn with_config(storage: S, config: ReconConfig) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self {
            matcher: ReconciliationMatcher::new(config.matcher.clone()),
            categorizer: TransactionCategorizer::new(config.categorizer.clone()),
            settlement: SettlementManager::new(storage.clone()),
            storage,
            config,
        })
    }

    /// Back the categorizer with an external classifier
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.categorizer =
            TransactionCategorizer::with_classifier(self.config.categorizer.clone(), classifier);
        self
    }

    /// Use a custom record validator for matching
    pub fn with_validator(mut self, validator: Box<dyn RecordValidator>) -> Self {
        self.matcher =
            ReconciliationMatcher::with_validator(self.config.matcher.clone(), validator);
        self
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Match all unmatched transactions of a company against its open
    /// invoices and apply the settlement policy to the new matches.
    ///
    /// Bad records and failed policy settlements are counted, not raised.
    /// Only storage failures abort the run.
    #[instrument(skip(self))]
    pub async fn run_reconciliation(
        &self,
        company_id: &str,
    ) -> ReconResult<ReconciliationRunSummary> {
        let transactions = self.storage.list_unmatched_transactions(company_id).await?;
        let invoices = self.storage.list_open_invoices(company_id).await?;
        let existing = self.storage.list_reconciliations(company_id).await?;
        let counterparties = self.load_counterparties(&invoices).await?;

        let mut summary = ReconciliationRunSummary {
            company_id: company_id.to_string(),
            total_transactions: transactions.len(),
            ..Default::default()
        };

        let batch = MatchBatch::new(company_id, transactions, invoices)
            .with_counterparties(counterparties)
            .with_open_reconciliations(&existing);
        let outcome = self.matcher.plan(&batch);

        summary.skipped_records = outcome.skipped.len();
        summary.unmatched = outcome.unmatched.len();

        let policy = &self.config.settlement;
        for proposal in outcome.proposals {
            let reconciliation = Reconciliation::new(
                company_id,
                proposal.transaction_id,
                proposal.invoice_id,
                proposal.match_type,
                proposal.score,
                proposal.amount,
            );

            match self.storage.insert_reconciliation(&reconciliation).await {
                Ok(()) => {}
                Err(error @ ReconError::DuplicateReconciliation(_)) => {
                    warn!(error = %error, "Transaction matched concurrently, skipping");
                    continue;
                }
                Err(error) => return Err(error),
            }

            summary.matches_found += 1;
            match reconciliation.match_type {
                MatchType::Exact => summary.exact_matches += 1,
                MatchType::Fuzzy => summary.fuzzy_matches += 1,
                MatchType::Manual => {}
            }

            if reconciliation.match_type != MatchType::Exact || !policy.auto_verify_exact {
                continue;
            }

            if let Err(error) = self.apply_policy(&reconciliation, &mut summary).await {
                if matches!(error, ReconError::Storage(_)) {
                    return Err(error);
                }
                warn!(
                    reconciliation_id = %reconciliation.id,
                    error = %error,
                    "Policy settlement failed"
                );
                summary.settlement_failures += 1;
            }
        }

        info!(
            total_transactions = summary.total_transactions,
            matches_found = summary.matches_found,
            exact_matches = summary.exact_matches,
            fuzzy_matches = summary.fuzzy_matches,
            auto_settled = summary.auto_settled,
            skipped_records = summary.skipped_records,
            "Reconciliation run finished"
        );
        Ok(summary)
    }

    async fn apply_policy(
        &self,
        reconciliation: &Reconciliation,
        summary: &mut ReconciliationRunSummary,
    ) -> ReconResult<()> {
        let verified = self.settlement.verify(&reconciliation.id).await?;
        summary.auto_verified += 1;

        if self.config.settlement.auto_settle_verified {
            self.settlement.settle(&verified.id).await?;
            summary.auto_settled += 1;
        }
        Ok(())
    }

    async fn load_counterparties(&self, invoices: &[Invoice]) -> ReconResult<Vec<Counterparty>> {
        let ids: HashSet<&str> = invoices
            .iter()
            .filter_map(|invoice| invoice.counterparty_id.as_deref())
            .collect();

        let mut counterparties = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(party) = self.storage.get_counterparty(id).await? {
                counterparties.push(party);
            }
        }
        Ok(counterparties)
    }

    // Settlement operations
    pub async fn verify(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        self.settlement.verify(reconciliation_id).await
    }

    pub async fn settle(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        self.settlement.settle(reconciliation_id).await
    }

    pub async fn reject(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        self.settlement.reject(reconciliation_id).await
    }

    pub async fn manual_settle(
        &self,
        transaction_id: &str,
        invoice_id: &str,
    ) -> ReconResult<Reconciliation> {
        self.settlement.manual_settle(transaction_id, invoice_id).await
    }

    pub async fn settle_all_verified(
        &self,
        company_id: &str,
    ) -> ReconResult<BulkSettlementSummary> {
        self.settlement.settle_all_verified(company_id).await
    }

    // Categorization operations
    /// Categorize one transaction and store the result
    pub async fn categorize_transaction(
        &self,
        transaction_id: &str,
    ) -> ReconResult<Categorization> {
        let transaction = self
            .storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ReconError::TransactionNotFound(transaction_id.to_string()))?;
        let context = self.invoice_context(&transaction).await?;

        let categorization = self
            .categorizer
            .categorize(&transaction, context.as_ref())
            .await;
        self.storage
            .update_transaction_category(&transaction.id, &categorization)
            .await?;
        Ok(categorization)
    }

    /// Categorize a company's transactions.
    ///
    /// Without `overwrite`, transactions that already carry a category are
    /// left alone. Only category fields are written.
    #[instrument(skip(self))]
    pub async fn categorize_company(
        &self,
        company_id: &str,
        overwrite: bool,
    ) -> ReconResult<CategorizationSummary> {
        let transactions = self.storage.list_transactions(company_id).await?;
        let mut summary = CategorizationSummary {
            company_id: company_id.to_string(),
            total_transactions: transactions.len(),
            ..Default::default()
        };

        let mut items = Vec::new();
        for transaction in transactions {
            if !overwrite && transaction.category.is_some() {
                summary.skipped += 1;
                continue;
            }
            let context = self.invoice_context(&transaction).await?;
            items.push((transaction, context));
        }

        for categorization in self.categorizer.categorize_batch(&items).await {
            self.storage
                .update_transaction_category(&categorization.transaction_id, &categorization)
                .await?;
            summary.record(&categorization);
        }

        info!(
            categorized = summary.categorized,
            skipped = summary.skipped,
            requires_review = summary.requires_review,
            uncategorized = summary.uncategorized,
            "Categorization finished"
        );
        Ok(summary)
    }

    /// Invoice context of the transaction's active reconciliation, if any
    async fn invoice_context(
        &self,
        transaction: &BankTransaction,
    ) -> ReconResult<Option<InvoiceContext>> {
        let Some(reconciliation) = self
            .storage
            .find_active_reconciliation(&transaction.id)
            .await?
        else {
            return Ok(None);
        };

        let Some(invoice) = self.storage.get_invoice(&reconciliation.invoice_id).await? else {
            return Ok(None);
        };

        let counterparty = match &invoice.counterparty_id {
            Some(id) => self.storage.get_counterparty(id).await?,
            None => None,
        };

        Ok(Some(InvoiceContext {
            invoice,
            reconciliation_status: reconciliation.status,
            counterparty,
        }))
    }

    /// Check the balance and status invariants of a company's records
    pub async fn check_integrity(&self, company_id: &str) -> ReconResult<IntegrityReport> {
        let invoices = self.storage.list_invoices(company_id).await?;
        let transactions = self.storage.list_transactions(company_id).await?;
        let reconciliations = self.storage.list_reconciliations(company_id).await?;

        let mut issues = Vec::new();

        let mut settled: HashMap<&str, BigDecimal> = HashMap::new();
        let mut active: HashMap<&str, Vec<&Reconciliation>> = HashMap::new();
        for recon in &reconciliations {
            if recon.status == ReconciliationStatus::Settled {
                *settled
                    .entry(recon.invoice_id.as_str())
                    .or_insert_with(BigDecimal::zero) += &recon.amount;
            }
            if recon.status.is_active() {
                active
                    .entry(recon.transaction_id.as_str())
                    .or_default()
                    .push(recon);
            }
        }

        for invoice in &invoices {
            let settled_sum = settled
                .get(invoice.id.as_str())
                .cloned()
                .unwrap_or_else(BigDecimal::zero);

            if invoice.outstanding_amount < BigDecimal::zero() {
                issues.push(format!(
                    "Invoice {} has negative outstanding amount {}",
                    invoice.id, invoice.outstanding_amount
                ));
            }

            if settled_sum > invoice.original_amount {
                issues.push(format!(
                    "Invoice {} has {} settled against an original amount of {}",
                    invoice.id, settled_sum, invoice.original_amount
                ));
            }

            let expected = &invoice.original_amount - &settled_sum;
            if invoice.outstanding_amount != expected {
                issues.push(format!(
                    "Invoice {} outstanding amount is {}, expected {}",
                    invoice.id, invoice.outstanding_amount, expected
                ));
            }
        }

        for transaction in &transactions {
            let links = active
                .get(transaction.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();

            if links.len() > 1 {
                issues.push(format!(
                    "Transaction {} has {} active reconciliations",
                    transaction.id,
                    links.len()
                ));
            }

            let expected = TransactionStatus::for_reconciliation(links.first().map(|r| r.status));
            if transaction.status != expected {
                issues.push(format!(
                    "Transaction {} is {:?}, expected {:?}",
                    transaction.id, transaction.status, expected
                ));
            }
        }

        Ok(IntegrityReport {
            company_id: company_id.to_string(),
            is_valid: issues.is_empty(),
            issues,
            invoices_checked: invoices.len(),
            transactions_checked: transactions.len(),
        })
    }
}

/// Counts from one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRunSummary {
    pub company_id: String,
    pub total_transactions: usize,
    pub matches_found: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub auto_verified: usize,
    pub auto_settled: usize,
    pub skipped_records: usize,
    pub settlement_failures: usize,
    pub unmatched: usize,
}

/// Counts from categorizing one company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizationSummary {
    pub company_id: String,
    pub total_transactions: usize,
    pub categorized: usize,
    /// Already categorized and left alone
    pub skipped: usize,
    pub from_invoice: usize,
    pub from_rules: usize,
    pub from_classifier: usize,
    pub uncategorized: usize,
    pub requires_review: usize,
}

impl CategorizationSummary {
    fn record(&mut self, categorization: &Categorization) {
        self.categorized += 1;
        match categorization.source {
            CategorySource::Invoice => self.from_invoice += 1,
            CategorySource::Rule => self.from_rules += 1,
            CategorySource::Classifier => self.from_classifier += 1,
            CategorySource::Fallback => self.uncategorized += 1,
        }
        if categorization.requires_review {
            self.requires_review += 1;
        }
    }
}

/// Report on reconciliation integrity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub company_id: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub invoices_checked: usize,
    pub transactions_checked: usize,
}
