//! Rule-based remediation recommendations.
//!
//! Each rule pairs a predicate over the canonical record and final
//! metrics with a recommendation generator. Rules run in descending
//! priority (stable for ties) and every matching rule contributes.

use serde_json::{json, Value as JsonValue};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::fixed::Fixed;
use crate::types::{
    AutofixRecommendation, CanonicalEvaluation, FixConfidence, FixType, MetricSet,
};

/// Chunk size assumed when the producer does not report one.
pub const DEFAULT_CHUNK_SIZE: u64 = 512;

/// Retrieval depth assumed when the producer does not report one.
pub const DEFAULT_TOP_K: u64 = 5;

/// Embedding model assumed when the producer does not report one.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Errors raised while evaluating a rule predicate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("metadata '{key}' should be {expected}, got {found}")]
    MetadataType {
        key: &'static str,
        expected: &'static str,
        found: String,
    },
}

pub type Predicate = fn(&CanonicalEvaluation, &MetricSet) -> Result<bool, RuleError>;
pub type Generator = fn(&CanonicalEvaluation, &MetricSet) -> Draft;

/// Recommendation body before the engine stamps the rule name on it.
pub struct Draft {
    pub fix_type: FixType,
    pub current_value: JsonValue,
    pub recommended_value: JsonValue,
    pub expected_improvement: &'static str,
    pub confidence: FixConfidence,
    pub evidence: BTreeMap<String, JsonValue>,
}

/// One remediation rule.
#[derive(Clone)]
pub struct AutoFixRule {
    pub name: &'static str,
    pub priority: u8,
    condition: Predicate,
    generator: Generator,
}

impl AutoFixRule {
    pub fn new(name: &'static str, priority: u8, condition: Predicate, generator: Generator) -> Self {
        Self {
            name,
            priority,
            condition,
            generator,
        }
    }

    /// Whether the rule fires. A predicate error counts as "no".
    pub fn applies(&self, canonical: &CanonicalEvaluation, metrics: &MetricSet) -> bool {
        match (self.condition)(canonical, metrics) {
            Ok(applies) => applies,
            Err(e) => {
                tracing::warn!(rule = self.name, error = %e, "Autofix rule skipped");
                false
            }
        }
    }

    pub fn generate(&self, canonical: &CanonicalEvaluation, metrics: &MetricSet) -> AutofixRecommendation {
        let draft = (self.generator)(canonical, metrics);
        AutofixRecommendation {
            rule_name: self.name.to_string(),
            fix_type: draft.fix_type,
            current_value: draft.current_value,
            recommended_value: draft.recommended_value,
            expected_improvement: draft.expected_improvement.to_string(),
            confidence: draft.confidence,
            evidence: draft.evidence,
        }
    }
}

impl std::fmt::Debug for AutoFixRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoFixRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

// ============================================================================
// Metadata helpers
// ============================================================================

fn describe(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(_) => "a boolean".to_string(),
        JsonValue::Number(n) => format!("number {}", n),
        JsonValue::String(s) => format!("string {:?}", s),
        JsonValue::Array(_) => "an array".to_string(),
        JsonValue::Object(_) => "an object".to_string(),
    }
}

/// Non-negative integer hint, or `default` when absent.
fn meta_count(c: &CanonicalEvaluation, key: &'static str, default: u64) -> Result<u64, RuleError> {
    let value = match c.metadata.get(key) {
        None | Some(JsonValue::Null) => return Ok(default),
        Some(value) => value,
    };

    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
        .ok_or_else(|| RuleError::MetadataType {
            key,
            expected: "a non-negative number",
            found: describe(value),
        })
}

/// Truthiness of a flag hint: empty, zero, false and null are off.
fn meta_flag(c: &CanonicalEvaluation, key: &str) -> bool {
    match c.metadata.get(key) {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
    }
}

fn meta_model(c: &CanonicalEvaluation) -> Result<&str, RuleError> {
    match c.metadata.get("model") {
        None | Some(JsonValue::Null) => Ok(""),
        Some(JsonValue::String(s)) => Ok(s.as_str()),
        Some(other) => Err(RuleError::MetadataType {
            key: "model",
            expected: "a string",
            found: describe(other),
        }),
    }
}

fn raw_meta(c: &CanonicalEvaluation, key: &str) -> JsonValue {
    c.metadata.get(key).cloned().unwrap_or(JsonValue::Null)
}

/// Mean retrieval score over chunks that carry one.
///
/// A score of exactly zero is how several retrievers report "unscored", so
/// those chunks are left out too.
fn mean_chunk_score(c: &CanonicalEvaluation) -> Option<f64> {
    let scores: Vec<f64> = c
        .context_chunks
        .iter()
        .filter_map(|ch| ch.score)
        .filter(|score| *score != 0.0)
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Flagship-tier model ids worth downgrading on cost grounds.
pub fn is_premium_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-4") {
        return !model.contains("mini");
    }
    model.starts_with("claude") && (model.contains("opus") || model.contains("sonnet"))
}

/// Cheaper model from the same vendor.
pub fn cheaper_alternative(model: &str) -> &'static str {
    if model.to_ascii_lowercase().starts_with("claude") {
        "claude-3-5-haiku-20241022"
    } else {
        "gpt-4o-mini"
    }
}

fn cost_threshold() -> Fixed {
    Fixed::from_raw(10_000_000_000)
}

// ============================================================================
// Built-in rules
// ============================================================================

fn chunk_size_too_small() -> AutoFixRule {
    AutoFixRule::new(
        "chunk_size_too_small",
        10,
        |c, m| {
            Ok(m.faithfulness.unwrap_or(1.0) < 0.6
                && meta_count(c, "chunk_size", DEFAULT_CHUNK_SIZE)? < 200)
        },
        |c, m| Draft {
            fix_type: FixType::ChunkSize,
            current_value: raw_meta(c, "chunk_size"),
            recommended_value: json!(DEFAULT_CHUNK_SIZE),
            expected_improvement: "+15-25% faithfulness",
            confidence: FixConfidence::High,
            evidence: BTreeMap::from([
                ("current_faithfulness".to_string(), json!(m.faithfulness)),
                ("chunk_fragmentation_detected".to_string(), json!(true)),
            ]),
        },
    )
}

fn high_hallucination() -> AutoFixRule {
    AutoFixRule::new(
        "high_hallucination",
        10,
        |c, m| Ok(m.hallucination_score.unwrap_or(0.0) > 0.3 && !meta_flag(c, "reranker")),
        |_, m| Draft {
            fix_type: FixType::Reranker,
            current_value: JsonValue::Null,
            recommended_value: json!("cohere-rerank-v3"),
            expected_improvement: "-20-30% hallucination",
            confidence: FixConfidence::Medium,
            evidence: BTreeMap::from([
                ("hallucination_score".to_string(), json!(m.hallucination_score)),
                ("reranker_currently_enabled".to_string(), json!(false)),
            ]),
        },
    )
}

fn low_retrieval_scores() -> AutoFixRule {
    AutoFixRule::new(
        "low_retrieval_scores",
        9,
        |c, _| Ok(mean_chunk_score(c).is_some_and(|mean| mean < 0.5)),
        |c, _| Draft {
            fix_type: FixType::EmbeddingModel,
            current_value: json!(c
                .metadata_str("embedding_model")
                .unwrap_or(DEFAULT_EMBEDDING_MODEL)),
            recommended_value: json!("text-embedding-3-large"),
            expected_improvement: "+15-25% retrieval quality",
            confidence: FixConfidence::High,
            evidence: BTreeMap::from([
                ("avg_context_score".to_string(), json!(mean_chunk_score(c))),
                ("sample_size".to_string(), json!(c.context_chunks.len())),
            ]),
        },
    )
}

fn low_context_recall() -> AutoFixRule {
    AutoFixRule::new(
        "low_context_recall",
        8,
        |c, m| {
            Ok(m.context_recall.unwrap_or(1.0) < 0.5
                && meta_count(c, "top_k", DEFAULT_TOP_K)? <= 3)
        },
        |c, m| {
            // The predicate only passes with a numeric top_k present
            let top_k = meta_count(c, "top_k", DEFAULT_TOP_K).unwrap_or(DEFAULT_TOP_K);
            Draft {
                fix_type: FixType::TopK,
                current_value: raw_meta(c, "top_k"),
                recommended_value: json!(top_k + 2),
                expected_improvement: "+10-20% context recall",
                confidence: FixConfidence::Medium,
                evidence: BTreeMap::from([
                    ("current_recall".to_string(), json!(m.context_recall)),
                    ("relevant_chunks_missed".to_string(), json!("estimated")),
                ]),
            }
        },
    )
}

fn cost_too_high() -> AutoFixRule {
    AutoFixRule::new(
        "cost_too_high",
        5,
        |c, m| {
            let cost = m.cost_per_query.unwrap_or(Fixed::ZERO);
            Ok(cost > cost_threshold() && is_premium_model(meta_model(c)?))
        },
        |c, m| {
            let model = meta_model(c).unwrap_or("");
            let cost = m.cost_per_query.unwrap_or(Fixed::ZERO);
            Draft {
                fix_type: FixType::Model,
                current_value: json!(model),
                recommended_value: json!(cheaper_alternative(model)),
                expected_improvement: "-70% cost with minimal quality loss",
                confidence: FixConfidence::High,
                evidence: BTreeMap::from([
                    ("current_cost".to_string(), json!(cost.to_string())),
                    (
                        "estimated_new_cost".to_string(),
                        json!(cost.scale_by(3, 10).to_string()),
                    ),
                ]),
            }
        },
    )
}

/// The built-in rule table, in declaration order.
pub fn builtin_rules() -> Vec<AutoFixRule> {
    vec![
        chunk_size_too_small(),
        high_hallucination(),
        low_retrieval_scores(),
        low_context_recall(),
        cost_too_high(),
    ]
}

/// Produces remediation recommendations from evaluation results.
#[derive(Debug, Clone)]
pub struct AutoFixEngine {
    rules: Vec<AutoFixRule>,
}

impl AutoFixEngine {
    pub fn new() -> Self {
        Self::with_rules(builtin_rules())
    }

    /// Engine over a custom rule table. Sorted by descending priority,
    /// keeping table order for ties.
    pub fn with_rules(mut rules: Vec<AutoFixRule>) -> Self {
        rules.sort_by_key(|r| Reverse(r.priority));
        Self { rules }
    }

    pub fn rules(&self) -> &[AutoFixRule] {
        &self.rules
    }

    pub fn analyze(
        &self,
        canonical: &CanonicalEvaluation,
        metrics: &MetricSet,
    ) -> Vec<AutofixRecommendation> {
        self.rules
            .iter()
            .filter(|rule| rule.applies(canonical, metrics))
            .map(|rule| rule.generate(canonical, metrics))
            .collect()
    }
}

impl Default for AutoFixEngine {
    fn default() -> Self {
        Self::new()
    }
}
