//! Layered transaction categorization
//!
//! A transaction is categorized by the first layer that produces an answer:
//!
//! 1. a confirmed (VERIFIED or SETTLED) invoice it is reconciled against,
//! 2. the deterministic narration rules in [`crate::categorization::rules`],
//! 3. the external [`Classifier`], bounded by a timeout.
//!
//! When the classifier is missing, fails, times out or answers with a code
//! outside the taxonomy, the transaction degrades to `UNCATEGORIZED` with
//! LOW confidence. That never fails the caller.

use bigdecimal::BigDecimal;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::categorization::rules::match_narration;
use crate::categorization::taxonomy::{CategoryCode, Taxonomy};
use crate::config::CategorizerConfig;
use crate::traits::*;
use crate::types::*;

/// Invoice keywords that mark a linked invoice as a service engagement
const SERVICE_KEYWORDS: &[&str] = &["SERVICE", "CONSULTING", "DEVELOPMENT", "SUPPORT"];

/// Which layer produced a categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategorySource {
    Invoice,
    Rule,
    Classifier,
    Fallback,
}

/// Category assignment for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub transaction_id: String,
    pub category: CategoryCode,
    pub confidence: Confidence,
    pub requires_review: bool,
    pub source: CategorySource,
    pub rationale: String,
}

impl Categorization {
    /// Hierarchy path of the assigned category
    pub fn path(&self) -> &'static str {
        self.category.path()
    }
}

/// Reconciliation context a transaction may be categorized from
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceContext {
    pub invoice: Invoice,
    /// Status of the reconciliation linking the transaction to `invoice`
    pub reconciliation_status: ReconciliationStatus,
    pub counterparty: Option<Counterparty>,
}

/// Assigns taxonomy categories to bank transactions
pub struct TransactionCategorizer {
    taxonomy: &'static Taxonomy,
    config: CategorizerConfig,
    classifier: Option<Box<dyn Classifier>>,
}

impl TransactionCategorizer {
    /// Create a categorizer that only uses invoices and narration rules
    pub fn new(config: CategorizerConfig) -> Self {
        Self {
            taxonomy: Taxonomy::standard(),
            config,
            classifier: None,
        }
    }

    /// Create a categorizer backed by an external classifier
    pub fn with_classifier(config: CategorizerConfig, classifier: Box<dyn Classifier>) -> Self {
        Self {
            taxonomy: Taxonomy::standard(),
            config,
            classifier: Some(classifier),
        }
    }

    pub fn taxonomy(&self) -> &'static Taxonomy {
        self.taxonomy
    }

    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    /// Categorize a single transaction
    pub async fn categorize(
        &self,
        transaction: &BankTransaction,
        context: Option<&InvoiceContext>,
    ) -> Categorization {
        let (category, confidence, source, rationale) =
            if let Some(assigned) = self.from_invoice(transaction, context) {
                assigned
            } else if let Some(hit) =
                match_narration(&transaction.narration(), transaction.direction, self.taxonomy)
            {
                (
                    hit.code,
                    Confidence::High,
                    CategorySource::Rule,
                    format!("narration matched '{}' ({})", hit.keyword, hit.rule),
                )
            } else {
                self.from_classifier(transaction, context).await
            };

        let requires_review = self.requires_review(confidence, &transaction.amount);
        debug!(
            transaction_id = %transaction.id,
            category = %category,
            ?confidence,
            ?source,
            requires_review,
            "Transaction categorized"
        );

        Categorization {
            transaction_id: transaction.id.clone(),
            category,
            confidence,
            requires_review,
            source,
            rationale,
        }
    }

    /// Categorize a batch with bounded classifier concurrency.
    ///
    /// Results come back in input order. A failing transaction degrades on
    /// its own and never affects the others.
    pub async fn categorize_batch(
        &self,
        items: &[(BankTransaction, Option<InvoiceContext>)],
    ) -> Vec<Categorization> {
        stream::iter(items)
            .map(|(transaction, context)| self.categorize(transaction, context.as_ref()))
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await
    }

    /// Low confidence or a large amount always needs a human look
    pub fn requires_review(&self, confidence: Confidence, amount: &BigDecimal) -> bool {
        confidence == Confidence::Low || amount.abs() > self.config.large_transaction_threshold
    }

    fn from_invoice(
        &self,
        transaction: &BankTransaction,
        context: Option<&InvoiceContext>,
    ) -> Option<(CategoryCode, Confidence, CategorySource, String)> {
        let context = context.filter(|ctx| ctx.reconciliation_status.is_confirmed())?;
        let invoice = &context.invoice;

        let (category, reason) = match invoice.category_code {
            Some(code) => (code, "invoice classification".to_string()),
            None => {
                let description = invoice.description.to_uppercase();
                let is_service = SERVICE_KEYWORDS
                    .iter()
                    .any(|keyword| description.contains(keyword));
                let code = match (invoice.direction, is_service) {
                    (InvoiceDirection::Sales, true) => CategoryCode::SERVICE_REVENUE,
                    (InvoiceDirection::Sales, false) => CategoryCode::PRODUCT_SALES_DOMESTIC,
                    (InvoiceDirection::Purchase, true) => CategoryCode::CONTRACTOR_PAYMENTS,
                    (InvoiceDirection::Purchase, false) => CategoryCode::RAW_MATERIALS,
                };
                let reason = if is_service {
                    "service invoice"
                } else {
                    "invoice direction default"
                };
                (code, reason.to_string())
            }
        };

        debug!(
            transaction_id = %transaction.id,
            invoice_id = %invoice.id,
            "Category taken from reconciled invoice"
        );

        Some((
            category,
            Confidence::High,
            CategorySource::Invoice,
            format!("{} of {} {}", reason, invoice.direction, invoice.invoice_number),
        ))
    }

    async fn from_classifier(
        &self,
        transaction: &BankTransaction,
        context: Option<&InvoiceContext>,
    ) -> (CategoryCode, Confidence, CategorySource, String) {
        match self.classify(transaction, context).await {
            Ok(Some((code, confidence, rationale))) => {
                (code, confidence, CategorySource::Classifier, rationale)
            }
            Ok(None) => (
                CategoryCode::UNCATEGORIZED,
                Confidence::Low,
                CategorySource::Fallback,
                "no rule matched and no classifier configured".to_string(),
            ),
            Err(error) => {
                warn!(
                    transaction_id = %transaction.id,
                    error = %error,
                    "Classification degraded to UNCATEGORIZED"
                );
                (
                    CategoryCode::UNCATEGORIZED,
                    Confidence::Low,
                    CategorySource::Fallback,
                    format!("classification unavailable: {}", error),
                )
            }
        }
    }

    async fn classify(
        &self,
        transaction: &BankTransaction,
        context: Option<&InvoiceContext>,
    ) -> Result<Option<(CategoryCode, Confidence, String)>, ClassificationError> {
        let Some(classifier) = self.classifier.as_ref() else {
            return Ok(None);
        };

        let request = classification_context(transaction, context);
        let response = tokio::time::timeout(
            self.config.classifier_timeout(),
            classifier.classify(&request, self.taxonomy),
        )
        .await
        .map_err(|_| ClassificationError::Timeout(self.config.classifier_timeout_ms))??;

        let code = self.taxonomy.resolve(&response.category_code).ok_or_else(|| {
            ClassificationError::MalformedResponse(format!(
                "category code '{}' is not in the taxonomy",
                response.category_code
            ))
        })?;

        let confidence = if code == CategoryCode::UNCATEGORIZED {
            Confidence::Low
        } else {
            response.confidence
        };

        Ok(Some((code, confidence, response.rationale)))
    }
}

fn classification_context(
    transaction: &BankTransaction,
    context: Option<&InvoiceContext>,
) -> ClassificationContext {
    ClassificationContext {
        transaction_id: transaction.id.clone(),
        date: transaction.date,
        amount: transaction.amount.clone(),
        direction: transaction.direction,
        description: transaction.description.clone(),
        reference: transaction.reference.clone(),
        is_reconciled: context.is_some(),
        counterparty_name: context
            .and_then(|ctx| ctx.counterparty.as_ref())
            .map(|party| party.name.clone()),
        invoice_number: context.map(|ctx| ctx.invoice.invoice_number.clone()),
        invoice_description: context
            .map(|ctx| ctx.invoice.description.clone())
            .filter(|description| !description.is_empty()),
    }
}

/// Parse a free-text classifier answer.
///
/// The first JSON object in `raw` is used, so answers wrapped in prose or a
/// fenced code block parse as well. The code itself is not validated here.
pub fn parse_classification_response(
    raw: &str,
) -> Result<ClassificationResponse, ClassificationError> {
    let object = first_json_object(raw).ok_or_else(|| {
        ClassificationError::MalformedResponse("no JSON object in response".to_string())
    })?;

    serde_json::from_str(object)
        .map_err(|e| ClassificationError::MalformedResponse(e.to_string()))
}

fn first_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
