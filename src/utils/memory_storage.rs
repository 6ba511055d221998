//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::categorization::Categorization;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct MemoryState {
    invoices: HashMap<String, Invoice>,
    transactions: HashMap<String, BankTransaction>,
    counterparties: HashMap<String, Counterparty>,
    reconciliations: HashMap<String, Reconciliation>,
}

/// In-memory storage implementation for testing and development
///
/// All records live behind one lock, so every trait call is atomic with
/// respect to every other. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an invoice, replacing any with the same id
    pub fn insert_invoice(&self, invoice: Invoice) -> ReconResult<()> {
        self.write()?.invoices.insert(invoice.id.clone(), invoice);
        Ok(())
    }

    /// Seed a bank transaction, replacing any with the same id
    pub fn insert_transaction(&self, transaction: BankTransaction) -> ReconResult<()> {
        self.write()?
            .transactions
            .insert(transaction.id.clone(), transaction);
        Ok(())
    }

    pub fn insert_counterparty(&self, counterparty: Counterparty) -> ReconResult<()> {
        self.write()?
            .counterparties
            .insert(counterparty.id.clone(), counterparty);
        Ok(())
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconResult<()> {
        let mut state = self.write()?;
        *state = MemoryState::default();
        Ok(())
    }

    fn read(&self) -> ReconResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| ReconError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> ReconResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| ReconError::Storage("memory storage lock poisoned".to_string()))
    }
}

fn sorted_by_id<T, F>(mut records: Vec<T>, id: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    records.sort_by(|a, b| id(a).cmp(id(b)));
    records
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn list_transactions(&self, company_id: &str) -> ReconResult<Vec<BankTransaction>> {
        let state = self.read()?;
        let transactions: Vec<BankTransaction> = state
            .transactions
            .values()
            .filter(|txn| txn.company_id == company_id)
            .cloned()
            .collect();
        Ok(sorted_by_id(transactions, |txn| txn.id.as_str()))
    }

    async fn list_unmatched_transactions(
        &self,
        company_id: &str,
    ) -> ReconResult<Vec<BankTransaction>> {
        let state = self.read()?;
        let transactions: Vec<BankTransaction> = state
            .transactions
            .values()
            .filter(|txn| txn.company_id == company_id)
            .filter(|txn| txn.status == TransactionStatus::Unmatched)
            .cloned()
            .collect();
        Ok(sorted_by_id(transactions, |txn| txn.id.as_str()))
    }

    async fn get_transaction(&self, transaction_id: &str) -> ReconResult<Option<BankTransaction>> {
        Ok(self.read()?.transactions.get(transaction_id).cloned())
    }

    async fn update_transaction_category(
        &self,
        transaction_id: &str,
        categorization: &Categorization,
    ) -> ReconResult<()> {
        let mut state = self.write()?;
        let txn = state
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| ReconError::TransactionNotFound(transaction_id.to_string()))?;

        txn.category = Some(categorization.category);
        txn.confidence = Some(categorization.confidence);
        txn.requires_review = categorization.requires_review;
        txn.category_rationale = Some(categorization.rationale.clone());
        Ok(())
    }

    async fn list_invoices(&self, company_id: &str) -> ReconResult<Vec<Invoice>> {
        let state = self.read()?;
        let invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| invoice.company_id == company_id)
            .cloned()
            .collect();
        Ok(sorted_by_id(invoices, |invoice| invoice.id.as_str()))
    }

    async fn list_open_invoices(&self, company_id: &str) -> ReconResult<Vec<Invoice>> {
        let state = self.read()?;
        let invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| invoice.company_id == company_id && invoice.is_open())
            .cloned()
            .collect();
        Ok(sorted_by_id(invoices, |invoice| invoice.id.as_str()))
    }

    async fn get_invoice(&self, invoice_id: &str) -> ReconResult<Option<Invoice>> {
        Ok(self.read()?.invoices.get(invoice_id).cloned())
    }

    async fn get_counterparty(&self, counterparty_id: &str) -> ReconResult<Option<Counterparty>> {
        Ok(self.read()?.counterparties.get(counterparty_id).cloned())
    }

    async fn list_reconciliations(&self, company_id: &str) -> ReconResult<Vec<Reconciliation>> {
        let state = self.read()?;
        let mut reconciliations: Vec<Reconciliation> = state
            .reconciliations
            .values()
            .filter(|recon| recon.company_id == company_id)
            .cloned()
            .collect();
        reconciliations.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(reconciliations)
    }

    async fn get_reconciliation(
        &self,
        reconciliation_id: &str,
    ) -> ReconResult<Option<Reconciliation>> {
        Ok(self.read()?.reconciliations.get(reconciliation_id).cloned())
    }

    async fn find_active_reconciliation(
        &self,
        transaction_id: &str,
    ) -> ReconResult<Option<Reconciliation>> {
        Ok(self
            .read()?
            .reconciliations
            .values()
            .find(|recon| recon.transaction_id == transaction_id && recon.status.is_active())
            .cloned())
    }

    async fn insert_reconciliation(&self, reconciliation: &Reconciliation) -> ReconResult<()> {
        let mut state = self.write()?;

        if state.reconciliations.values().any(|existing| {
            existing.transaction_id == reconciliation.transaction_id && existing.status.is_active()
        }) {
            return Err(ReconError::DuplicateReconciliation(
                reconciliation.transaction_id.clone(),
            ));
        }

        if state.reconciliations.contains_key(&reconciliation.id) {
            return Err(ReconError::Validation(format!(
                "Reconciliation with ID '{}' already exists",
                reconciliation.id
            )));
        }

        if !state.invoices.contains_key(&reconciliation.invoice_id) {
            return Err(ReconError::InvoiceNotFound(reconciliation.invoice_id.clone()));
        }

        let txn = state
            .transactions
            .get_mut(&reconciliation.transaction_id)
            .ok_or_else(|| ReconError::TransactionNotFound(reconciliation.transaction_id.clone()))?;
        txn.status = TransactionStatus::for_reconciliation(Some(reconciliation.status));

        state
            .reconciliations
            .insert(reconciliation.id.clone(), reconciliation.clone());
        Ok(())
    }

    async fn commit_transition(&self, change: &SettlementChange) -> ReconResult<Reconciliation> {
        let mut state = self.write()?;
        let next = &change.reconciliation;

        let current = state
            .reconciliations
            .get(&next.id)
            .ok_or_else(|| ReconError::ReconciliationNotFound(next.id.clone()))?;
        if current.version != change.expected_version {
            return Err(ReconError::ConcurrentSettlementConflict {
                reconciliation_id: next.id.clone(),
                found: current.status,
            });
        }

        if !state.transactions.contains_key(&next.transaction_id) {
            return Err(ReconError::TransactionNotFound(next.transaction_id.clone()));
        }

        // Work on a copy so a rejected delta leaves the stored invoice intact.
        let invoice = match &change.invoice_delta {
            Some(delta) => {
                let mut invoice = state
                    .invoices
                    .get(&next.invoice_id)
                    .cloned()
                    .ok_or_else(|| ReconError::InvoiceNotFound(next.invoice_id.clone()))?;
                invoice.apply_balance_delta(delta)?;
                Some(invoice)
            }
            None => None,
        };

        if let Some(invoice) = invoice {
            state.invoices.insert(invoice.id.clone(), invoice);
        }
        if let Some(txn) = state.transactions.get_mut(&next.transaction_id) {
            txn.status = change.transaction_status;
        }
        state.reconciliations.insert(next.id.clone(), next.clone());

        Ok(next.clone())
    }
}
