//! Settlement lifecycle of reconciliations
//!
//! ```text
//! PENDING -> VERIFIED -> SETTLED
//!    \          |          /
//!     +----> REJECTED <---+
//! ```
//!
//! Every transition goes through [`ReconciliationStorage::commit_transition`]
//! with the version it was computed from, so of two racing settle or reject
//! calls on one reconciliation only the first one lands.

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::traits::*;
use crate::types::*;

/// Result of settling every verified reconciliation of a company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkSettlementSummary {
    pub total_verified: usize,
    pub settled: usize,
    pub failures: Vec<SettlementFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub reconciliation_id: String,
    pub error: String,
}

/// Settlement manager for verifying, settling and reversing reconciliations
pub struct SettlementManager<S: ReconciliationStorage> {
    pub(crate) storage: S,
}

impl<S: ReconciliationStorage> SettlementManager<S> {
    /// Create a new settlement manager
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Confirm a PENDING reconciliation. Balances do not change yet.
    pub async fn verify(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        let current = self.get_reconciliation_required(reconciliation_id).await?;

        match current.status {
            ReconciliationStatus::Pending => {}
            ReconciliationStatus::Verified => {
                return Err(ReconError::ConcurrentSettlementConflict {
                    reconciliation_id: current.id,
                    found: ReconciliationStatus::Verified,
                })
            }
            from @ (ReconciliationStatus::Settled | ReconciliationStatus::Rejected) => {
                return Err(ReconError::InvalidTransition {
                    from,
                    to: ReconciliationStatus::Verified,
                })
            }
        }

        let verified = self
            .commit(&current, ReconciliationStatus::Verified, None)
            .await?;
        info!(reconciliation_id = %verified.id, "Reconciliation verified");
        Ok(verified)
    }

    /// Apply a VERIFIED reconciliation to its invoice.
    ///
    /// The invoice's outstanding amount drops by the reconciled amount and
    /// the transaction becomes SETTLED, in one atomic step. A second settle
    /// is a conflict and changes nothing.
    #[instrument(skip(self))]
    pub async fn settle(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        let current = self.get_reconciliation_required(reconciliation_id).await?;

        match current.status {
            ReconciliationStatus::Verified => {}
            ReconciliationStatus::Pending => {
                return Err(ReconError::InvalidTransition {
                    from: ReconciliationStatus::Pending,
                    to: ReconciliationStatus::Settled,
                })
            }
            found @ (ReconciliationStatus::Settled | ReconciliationStatus::Rejected) => {
                return Err(ReconError::ConcurrentSettlementConflict {
                    reconciliation_id: current.id,
                    found,
                })
            }
        }

        let delta = -current.amount.clone();
        let settled = self
            .commit(&current, ReconciliationStatus::Settled, Some(delta))
            .await?;

        info!(
            reconciliation_id = %settled.id,
            invoice_id = %settled.invoice_id,
            amount = %settled.amount,
            "Reconciliation settled"
        );
        Ok(settled)
    }

    /// Reject a reconciliation, reversing any balance already applied.
    ///
    /// The transaction returns to UNMATCHED and is picked up again by the
    /// next matcher run.
    #[instrument(skip(self))]
    pub async fn reject(&self, reconciliation_id: &str) -> ReconResult<Reconciliation> {
        let current = self.get_reconciliation_required(reconciliation_id).await?;

        let delta = match current.status {
            ReconciliationStatus::Pending | ReconciliationStatus::Verified => None,
            ReconciliationStatus::Settled => Some(current.amount.clone()),
            ReconciliationStatus::Rejected => {
                return Err(ReconError::ConcurrentSettlementConflict {
                    reconciliation_id: current.id,
                    found: ReconciliationStatus::Rejected,
                })
            }
        };

        let reversed = delta.is_some();
        let rejected = self
            .commit(&current, ReconciliationStatus::Rejected, delta)
            .await?;

        info!(
            reconciliation_id = %rejected.id,
            reversed,
            "Reconciliation rejected"
        );
        Ok(rejected)
    }

    /// Link a transaction to an invoice by hand and settle it immediately
    #[instrument(skip(self))]
    pub async fn manual_settle(
        &self,
        transaction_id: &str,
        invoice_id: &str,
    ) -> ReconResult<Reconciliation> {
        let transaction = self
            .storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ReconError::TransactionNotFound(transaction_id.to_string()))?;
        let invoice = self
            .storage
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| ReconError::InvoiceNotFound(invoice_id.to_string()))?;

        if transaction.company_id != invoice.company_id {
            return Err(ReconError::Validation(format!(
                "Transaction '{}' and invoice '{}' belong to different companies",
                transaction.id, invoice.id
            )));
        }

        if transaction.direction.invoice_direction() != invoice.direction {
            return Err(ReconError::DirectionMismatch {
                transaction: transaction.direction,
                invoice: invoice.direction,
            });
        }

        if transaction.amount <= BigDecimal::zero() {
            return Err(ReconError::data(&transaction.id, "amount must be positive"));
        }

        if transaction.amount > invoice.outstanding_amount {
            return Err(ReconError::InvariantViolation(format!(
                "transaction {} amount {} exceeds invoice {} outstanding {}",
                transaction.id, transaction.amount, invoice.id, invoice.outstanding_amount
            )));
        }

        if self
            .storage
            .find_active_reconciliation(&transaction.id)
            .await?
            .is_some()
        {
            return Err(ReconError::DuplicateReconciliation(transaction.id));
        }

        let reconciliation = Reconciliation::new(
            transaction.company_id,
            transaction.id,
            invoice.id,
            MatchType::Manual,
            1.0,
            transaction.amount,
        );
        self.storage.insert_reconciliation(&reconciliation).await?;

        match self.verify_and_settle(&reconciliation).await {
            Ok(settled) => Ok(settled),
            Err(err) => {
                // leave no half-done manual link behind
                if let Err(undo) = self.reject(&reconciliation.id).await {
                    warn!(
                        reconciliation_id = %reconciliation.id,
                        error = %undo,
                        "Could not withdraw manual reconciliation"
                    );
                }
                Err(err)
            }
        }
    }

    async fn verify_and_settle(&self, pending: &Reconciliation) -> ReconResult<Reconciliation> {
        let verified = self
            .commit(pending, ReconciliationStatus::Verified, None)
            .await?;
        self.settle(&verified.id).await
    }

    /// Settle every VERIFIED reconciliation of a company.
    ///
    /// Failures are collected per reconciliation and never stop the loop;
    /// only a storage failure while listing aborts.
    #[instrument(skip(self))]
    pub async fn settle_all_verified(
        &self,
        company_id: &str,
    ) -> ReconResult<BulkSettlementSummary> {
        let verified: Vec<Reconciliation> = self
            .storage
            .list_reconciliations(company_id)
            .await?
            .into_iter()
            .filter(|recon| recon.status == ReconciliationStatus::Verified)
            .collect();

        let mut summary = BulkSettlementSummary {
            total_verified: verified.len(),
            ..Default::default()
        };

        for recon in verified {
            match self.settle(&recon.id).await {
                Ok(_) => summary.settled += 1,
                Err(error @ ReconError::Storage(_)) => return Err(error),
                Err(error) => {
                    warn!(reconciliation_id = %recon.id, error = %error, "Settlement failed");
                    summary.failures.push(SettlementFailure {
                        reconciliation_id: recon.id,
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            company_id,
            total = summary.total_verified,
            settled = summary.settled,
            failed = summary.failures.len(),
            "Bulk settlement finished"
        );
        Ok(summary)
    }

    /// Get a reconciliation by ID, returning an error if not found
    pub async fn get_reconciliation_required(
        &self,
        reconciliation_id: &str,
    ) -> ReconResult<Reconciliation> {
        self.storage
            .get_reconciliation(reconciliation_id)
            .await?
            .ok_or_else(|| ReconError::ReconciliationNotFound(reconciliation_id.to_string()))
    }

    async fn commit(
        &self,
        current: &Reconciliation,
        status: ReconciliationStatus,
        invoice_delta: Option<BigDecimal>,
    ) -> ReconResult<Reconciliation> {
        let change = SettlementChange {
            reconciliation: current.transitioned(status),
            expected_version: current.version,
            transaction_status: TransactionStatus::for_reconciliation(Some(status)),
            invoice_delta,
        };
        self.storage.commit_transition(&change).await
    }
}
