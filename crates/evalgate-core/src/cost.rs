//! Versioned price table and exact cost accounting.
//!
//! Rates are quoted per million tokens and must carry at most six
//! fractional digits, which makes `tokens * rate / 1e6` exact in
//! [`Fixed`]'s twelve-digit representation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::fixed::Fixed;
use crate::types::Stage;

/// Version string of the built-in table.
pub const BUILTIN_PRICING_VERSION: &str = "builtin-2025-01";

/// Scorer calls one judge evaluation makes when estimating ahead of time.
pub const ESTIMATED_JUDGE_CALLS: u64 = 5;

/// Output tokens assumed per estimated judge call.
pub const ESTIMATED_OUTPUT_PER_CALL: u64 = 50;

/// Errors from loading or validating a price table.
#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to read pricing file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse pricing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Price table has no models")]
    Empty,

    #[error("Model '{model}': {field} must not be negative")]
    NegativeRate { model: String, field: &'static str },

    #[error("Model '{model}': {field} has more than 6 fractional digits")]
    TooPrecise { model: String, field: &'static str },
}

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_million: Fixed,
    pub output_per_million: Fixed,
}

impl ModelRate {
    /// Rates given in micro-dollars per million tokens.
    pub const fn from_micros(input: i64, output: i64) -> Self {
        Self {
            input_per_million: Fixed::from_raw(input as i128 * 1_000_000),
            output_per_million: Fixed::from_raw(output as i128 * 1_000_000),
        }
    }

    fn combined(&self) -> Fixed {
        self.input_per_million + self.output_per_million
    }
}

/// Versioned mapping of model id to rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub pricing_version: String,
    pub models: BTreeMap<String, ModelRate>,
}

impl PriceTable {
    /// Built-in default table.
    pub fn builtin() -> Self {
        let models = [
            ("gpt-4o", ModelRate::from_micros(2_500_000, 10_000_000)),
            ("gpt-4o-mini", ModelRate::from_micros(150_000, 600_000)),
            ("gpt-4-turbo", ModelRate::from_micros(10_000_000, 30_000_000)),
            ("claude-sonnet-4-20250514", ModelRate::from_micros(3_000_000, 15_000_000)),
            ("claude-3-5-haiku-20241022", ModelRate::from_micros(1_000_000, 5_000_000)),
            ("claude-haiku-4-20250131", ModelRate::from_micros(800_000, 4_000_000)),
        ];

        Self {
            pricing_version: BUILTIN_PRICING_VERSION.to_string(),
            models: models
                .into_iter()
                .map(|(name, rate)| (name.to_string(), rate))
                .collect(),
        }
    }

    /// Parse and validate a YAML price table.
    pub fn from_yaml(yaml: &str) -> Result<Self, PricingError> {
        let table: PriceTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    /// Load and validate a YAML price table from disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), PricingError> {
        if self.models.is_empty() {
            return Err(PricingError::Empty);
        }

        for (model, rate) in &self.models {
            for (field, value) in [
                ("input_per_million", rate.input_per_million),
                ("output_per_million", rate.output_per_million),
            ] {
                if value.is_negative() {
                    return Err(PricingError::NegativeRate {
                        model: model.clone(),
                        field,
                    });
                }
                if value.fractional_digits() > 6 {
                    return Err(PricingError::TooPrecise {
                        model: model.clone(),
                        field,
                    });
                }
            }
        }

        Ok(())
    }

    /// Lowest combined input+output rate. Ties break by model id.
    ///
    /// `validate` guarantees at least one model.
    fn cheapest(&self) -> Option<(&str, &ModelRate)> {
        self.models
            .iter()
            .min_by(|a, b| a.1.combined().cmp(&b.1.combined()).then_with(|| a.0.cmp(b.0)))
            .map(|(name, rate)| (name.as_str(), rate))
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Per-stage cost projection for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCostEstimate {
    pub deterministic: Fixed,
    pub small_model: Fixed,
    pub large_model: Fixed,
    pub total: Fixed,
    pub tokens: u64,
    pub pricing_version: String,
}

/// Converts token counts into exact monetary cost.
///
/// Cheap to clone; the table is shared read-only.
#[derive(Debug, Clone)]
pub struct CostAccountant {
    table: Arc<PriceTable>,
}

impl CostAccountant {
    pub fn new(table: Arc<PriceTable>) -> Self {
        Self { table }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(PriceTable::builtin()))
    }

    /// Version of the price table in use.
    pub fn pricing_version(&self) -> &str {
        &self.table.pricing_version
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Whether `model` has its own entry in the table.
    pub fn knows(&self, model: &str) -> bool {
        self.table.models.contains_key(model)
    }

    /// Rates applied to `model`, falling back to the cheapest tier.
    pub fn rate_for(&self, model: &str) -> ModelRate {
        if let Some(rate) = self.table.models.get(model) {
            return *rate;
        }

        match self.table.cheapest() {
            Some((fallback, rate)) => {
                tracing::warn!(
                    model = %model,
                    fallback = %fallback,
                    pricing_version = %self.table.pricing_version,
                    "Unknown model, using cheapest pricing tier"
                );
                *rate
            }
            None => ModelRate::from_micros(0, 0),
        }
    }

    /// `input * input_rate + output * output_rate`, exact.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Fixed {
        let rate = self.rate_for(model);
        rate.input_per_million.per_million(input_tokens)
            + rate.output_per_million.per_million(output_tokens)
    }

    /// Project what an evaluation reaching `stage` would cost.
    ///
    /// Assumes each judge stage makes a fixed number of short scorer calls
    /// over the whole prompt.
    pub fn estimate_stage_costs(
        &self,
        prompt_tokens: u64,
        stage: Stage,
        small_model: &str,
        large_model: &str,
    ) -> StageCostEstimate {
        let total_input = prompt_tokens * ESTIMATED_JUDGE_CALLS;
        let total_output = ESTIMATED_OUTPUT_PER_CALL * ESTIMATED_JUDGE_CALLS;

        let small_model_cost = if stage >= Stage::SmallModel {
            self.cost(small_model, total_input, total_output)
        } else {
            Fixed::ZERO
        };
        let large_model_cost = if stage == Stage::LargeModel {
            self.cost(large_model, total_input, total_output)
        } else {
            Fixed::ZERO
        };

        StageCostEstimate {
            deterministic: Fixed::ZERO,
            small_model: small_model_cost,
            large_model: large_model_cost,
            total: small_model_cost + large_model_cost,
            tokens: total_input + total_output,
            pricing_version: self.table.pricing_version.clone(),
        }
    }
}

impl Default for CostAccountant {
    fn default() -> Self {
        Self::builtin()
    }
}
