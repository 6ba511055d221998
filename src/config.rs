//! Runtime policy for matching, categorization and settlement
//!
//! All numeric constants here are policy rather than contract. Defaults
//! follow the values the business runs with; hosts may override them from a
//! config file (every section deserializes with defaults) or from `RECON_*`
//! environment variables.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::types::*;

/// Relative weights of the fuzzy-match signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub amount: f64,
    pub date: f64,
    pub text: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            amount: 0.4,
            date: 0.2,
            text: 0.4,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.amount + self.date + self.text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Fuzzy window around the outstanding amount, as a fraction (0.01 = ±1 %)
    pub amount_tolerance: f64,
    /// Fuzzy window around the invoice date, in days
    pub date_window_days: i64,
    /// Minimum composite score for a fuzzy match
    pub acceptance_threshold: f64,
    pub weights: ScoreWeights,
    /// Invoice numbers shorter than this (after normalization) never count as
    /// found in a narration
    pub min_reference_len: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.01,
            date_window_days: 45,
            acceptance_threshold: 0.6,
            weights: ScoreWeights::default(),
            min_reference_len: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerConfig {
    /// Transactions above this absolute amount always need review
    pub large_transaction_threshold: BigDecimal,
    pub classifier_timeout_ms: u64,
    /// Upper bound on classification calls in flight per batch
    pub max_concurrency: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            large_transaction_threshold: BigDecimal::from(100_000),
            classifier_timeout_ms: 10_000,
            max_concurrency: 4,
        }
    }
}

impl CategorizerConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

/// What a reconciliation run does with the proposals it creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementPolicy {
    /// Verify EXACT matches as soon as they are created
    pub auto_verify_exact: bool,
    /// Settle reconciliations verified by policy within the same run
    pub auto_settle_verified: bool,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            auto_verify_exact: true,
            auto_settle_verified: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub matcher: MatcherConfig,
    pub categorizer: CategorizerConfig,
    pub settlement: SettlementPolicy,
}

impl ReconConfig {
    /// Defaults overlaid with `RECON_*` environment variables
    pub fn from_env() -> ReconResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> ReconResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = Overlay { lookup: &lookup };

        let config = Self {
            matcher: MatcherConfig {
                amount_tolerance: read.or(
                    "RECON_AMOUNT_TOLERANCE",
                    defaults.matcher.amount_tolerance,
                )?,
                date_window_days: read.or(
                    "RECON_DATE_WINDOW_DAYS",
                    defaults.matcher.date_window_days,
                )?,
                acceptance_threshold: read.or(
                    "RECON_ACCEPTANCE_THRESHOLD",
                    defaults.matcher.acceptance_threshold,
                )?,
                weights: ScoreWeights {
                    amount: read.or("RECON_WEIGHT_AMOUNT", defaults.matcher.weights.amount)?,
                    date: read.or("RECON_WEIGHT_DATE", defaults.matcher.weights.date)?,
                    text: read.or("RECON_WEIGHT_TEXT", defaults.matcher.weights.text)?,
                },
                min_reference_len: read.or(
                    "RECON_MIN_REFERENCE_LEN",
                    defaults.matcher.min_reference_len,
                )?,
            },
            categorizer: CategorizerConfig {
                large_transaction_threshold: read.or(
                    "RECON_LARGE_TRANSACTION_THRESHOLD",
                    defaults.categorizer.large_transaction_threshold,
                )?,
                classifier_timeout_ms: read.or(
                    "RECON_CLASSIFIER_TIMEOUT_MS",
                    defaults.categorizer.classifier_timeout_ms,
                )?,
                max_concurrency: read.or(
                    "RECON_CLASSIFIER_CONCURRENCY",
                    defaults.categorizer.max_concurrency,
                )?,
            },
            settlement: SettlementPolicy {
                auto_verify_exact: read.or(
                    "RECON_AUTO_VERIFY_EXACT",
                    defaults.settlement.auto_verify_exact,
                )?,
                auto_settle_verified: read.or(
                    "RECON_AUTO_SETTLE_VERIFIED",
                    defaults.settlement.auto_settle_verified,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the matcher or categorizer cannot work with
    pub fn validate(&self) -> ReconResult<()> {
        let matcher = &self.matcher;

        if !(0.0..=1.0).contains(&matcher.amount_tolerance) {
            return Err(ReconError::Config(format!(
                "amount_tolerance must be within [0, 1], got {}",
                matcher.amount_tolerance
            )));
        }

        if matcher.date_window_days < 0 {
            return Err(ReconError::Config(format!(
                "date_window_days cannot be negative, got {}",
                matcher.date_window_days
            )));
        }

        if !(0.0..=1.0).contains(&matcher.acceptance_threshold) {
            return Err(ReconError::Config(format!(
                "acceptance_threshold must be within [0, 1], got {}",
                matcher.acceptance_threshold
            )));
        }

        let weights = &matcher.weights;
        if [weights.amount, weights.date, weights.text]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(ReconError::Config(
                "score weights must be finite and non-negative".to_string(),
            ));
        }

        if weights.total() <= 0.0 {
            return Err(ReconError::Config(
                "at least one score weight must be positive".to_string(),
            ));
        }

        if self.categorizer.max_concurrency == 0 {
            return Err(ReconError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

struct Overlay<'a, F> {
    lookup: &'a F,
}

impl<F> Overlay<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn or<T>(&self, key: &str, default: T) -> ReconResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ReconError::Config(format!("{}='{}': {}", key, raw, e))),
            None => Ok(default),
        }
    }
}
