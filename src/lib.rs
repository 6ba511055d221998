//! # Reconciliation Core
//!
//! A library for reconciling bank transactions against sales and purchase
//! invoices and for classifying transactions into a fixed accounting
//! category taxonomy.
//!
//! ## Features
//!
//! - **Matching**: Exact and fuzzy matching with deterministic, oldest-first allocation
//! - **Settlement**: Verify, settle and reject with exact balance reversal
//! - **Categorization**: Invoice-derived, rule-based and classifier-backed categories
//! - **Taxonomy**: Fixed chart of income, expense and non-P&L categories
//! - **Storage abstraction**: Database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{
//!     BankTransaction, Invoice, InvoiceDirection, MemoryStorage, ReconciliationEngine,
//!     TransactionDirection,
//! };
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # async fn run() -> reconciliation_core::ReconResult<()> {
//! let storage = MemoryStorage::new();
//! storage.insert_invoice(Invoice::new(
//!     "inv-1",
//!     "acme",
//!     InvoiceDirection::Sales,
//!     "INV-2025-001",
//!     BigDecimal::from(118_000),
//!     NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
//! ))?;
//! storage.insert_transaction(BankTransaction::new(
//!     "txn-1",
//!     "acme",
//!     NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(),
//!     BigDecimal::from(118_000),
//!     TransactionDirection::Credit,
//!     "NEFT CR INV-2025-001",
//! ))?;
//!
//! let engine = ReconciliationEngine::new(storage);
//! let summary = engine.run_reconciliation("acme").await?;
//! assert_eq!(summary.exact_matches, 1);
//! # Ok(())
//! # }
//! ```

pub mod categorization;
pub mod config;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use categorization::*;
pub use config::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::{DefaultRecordValidator, MemoryStorage};
