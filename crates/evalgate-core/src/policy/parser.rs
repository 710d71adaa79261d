//! Gate policy parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_policy_schema;
use crate::fixed::Fixed;

/// Errors that can occur when loading a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Policy does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Policy validation failed: {0}")]
    ValidationError(String),
}

/// Cut points at which a threshold breach becomes P1 instead of P2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityCutoffs {
    /// Faithfulness strictly below this is P1
    pub faithfulness_p1: Fixed,

    /// Hallucination strictly above this is P1
    pub hallucination_p1: Fixed,
}

impl Default for SeverityCutoffs {
    fn default() -> Self {
        Self {
            faithfulness_p1: Fixed::from_raw(500_000_000_000),
            hallucination_p1: Fixed::from_raw(400_000_000_000),
        }
    }
}

/// Per-project quality thresholds.
///
/// A version's thresholds are immutable once results have been cached
/// under it; change thresholds by bumping `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub version: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub min_faithfulness: Fixed,
    pub min_context_recall: Fixed,
    pub min_context_precision: Fixed,
    pub max_hallucination: Fixed,
    pub max_latency_ms: u64,
    pub max_cost_per_query: Fixed,
    pub severity_cutoffs: SeverityCutoffs,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            version: 1,
            name: None,
            project_id: None,
            min_faithfulness: Fixed::from_raw(700_000_000_000),
            min_context_recall: Fixed::from_raw(600_000_000_000),
            min_context_precision: Fixed::from_raw(600_000_000_000),
            max_hallucination: Fixed::from_raw(200_000_000_000),
            max_latency_ms: 5000,
            max_cost_per_query: Fixed::from_raw(10_000_000_000),
            severity_cutoffs: SeverityCutoffs::default(),
        }
    }
}

impl GatePolicy {
    /// Parse a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        if yaml.trim().is_empty() {
            return Self::from_document(serde_json::Value::Null);
        }
        let document: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_document(document)
    }

    /// Parse a policy from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let document: serde_json::Value = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Parse a policy from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_document(document: serde_json::Value) -> Result<Self, PolicyError> {
        // An empty document means "all defaults"
        let document = if document.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            document
        };

        validate_policy_schema(&document).map_err(PolicyError::SchemaError)?;
        let policy: GatePolicy = serde_json::from_value(document)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version == 0 {
            return Err(PolicyError::ValidationError(
                "version must be at least 1".to_string(),
            ));
        }

        let unit_fields = [
            ("min_faithfulness", self.min_faithfulness),
            ("min_context_recall", self.min_context_recall),
            ("min_context_precision", self.min_context_precision),
            ("max_hallucination", self.max_hallucination),
            ("severity_cutoffs.faithfulness_p1", self.severity_cutoffs.faithfulness_p1),
            ("severity_cutoffs.hallucination_p1", self.severity_cutoffs.hallucination_p1),
        ];
        for (field, value) in unit_fields {
            if value < Fixed::ZERO || value > Fixed::ONE {
                return Err(PolicyError::ValidationError(format!(
                    "{} must be within [0, 1], got {}",
                    field, value
                )));
            }
        }

        if self.max_cost_per_query.is_negative() {
            return Err(PolicyError::ValidationError(
                "max_cost_per_query must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}
