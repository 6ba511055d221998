//! Validation utilities for ingested records

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;

use crate::traits::*;
use crate::types::*;

/// Validate that an amount is positive
pub fn validate_positive_amount(record_id: &str, amount: &BigDecimal) -> ReconResult<()> {
    if *amount <= BigDecimal::zero() {
        Err(ReconError::data(
            record_id,
            format!("amount must be positive, got {}", amount),
        ))
    } else {
        Ok(())
    }
}

/// Validate that a record id is usable as a key
pub fn validate_record_id(record_id: &str) -> ReconResult<()> {
    if record_id.trim().is_empty() {
        return Err(ReconError::Validation(
            "Record ID cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate a bank transaction and return its booking date
pub fn validate_transaction_record(transaction: &BankTransaction) -> ReconResult<NaiveDate> {
    validate_record_id(&transaction.id)?;
    validate_positive_amount(&transaction.id, &transaction.amount)?;
    transaction
        .date
        .ok_or_else(|| ReconError::data(&transaction.id, "transaction date is missing"))
}

/// Validate an invoice and return its issue date
pub fn validate_invoice_record(invoice: &Invoice) -> ReconResult<NaiveDate> {
    validate_record_id(&invoice.id)?;
    validate_positive_amount(&invoice.id, &invoice.original_amount)?;

    if invoice.outstanding_amount < BigDecimal::zero() {
        return Err(ReconError::data(
            &invoice.id,
            format!(
                "outstanding amount is negative: {}",
                invoice.outstanding_amount
            ),
        ));
    }

    if invoice.outstanding_amount > invoice.original_amount {
        return Err(ReconError::data(
            &invoice.id,
            format!(
                "outstanding amount {} exceeds original amount {}",
                invoice.outstanding_amount, invoice.original_amount
            ),
        ));
    }

    invoice
        .issue_date
        .ok_or_else(|| ReconError::data(&invoice.id, "invoice date is missing"))
}

/// Default record validator used by the matcher
pub struct DefaultRecordValidator;

impl RecordValidator for DefaultRecordValidator {
    fn validate_transaction(&self, transaction: &BankTransaction) -> ReconResult<NaiveDate> {
        validate_transaction_record(transaction)
    }

    fn validate_invoice(&self, invoice: &Invoice) -> ReconResult<NaiveDate> {
        validate_invoice_record(invoice)
    }
}
