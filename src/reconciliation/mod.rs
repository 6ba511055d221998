//! Reconciliation of bank transactions against open invoices
//!
//! Matching produces proposals, settlement moves them through their
//! lifecycle, and the engine ties both to storage.

pub mod core;
pub mod matcher;
pub mod scoring;
pub mod settlement;

pub use self::core::*;
pub use matcher::*;
pub use scoring::*;
pub use settlement::*;
