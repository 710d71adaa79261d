//! Core types for evalgate evaluation.
//!
//! These types carry an evaluation from canonical input through the
//! staged pipeline to a gate verdict and remediation recommendations.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::fixed::Fixed;

/// Free-form producer metadata. `BTreeMap` keeps serialization ordered.
pub type Metadata = BTreeMap<String, JsonValue>;

// ============================================================================
// Severity, decision, stage
// ============================================================================

/// Failure severity. `P0` is the most critical.
///
/// Ordering follows criticality: `P0 > P1 > P2 > P3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

impl Severity {
    /// 0 for P0 through 3 for P3.
    pub fn level(self) -> u8 {
        match self {
            Severity::P0 => 0,
            Severity::P1 => 1,
            Severity::P2 => 2,
            Severity::P3 => 3,
        }
    }

    /// Merge a newly observed severity into the running one.
    ///
    /// Severity only ever moves toward P0. This is the single merge path for
    /// accumulating severities, so the result is independent of the order in
    /// which findings arrive.
    pub fn upgrade(self, observed: Severity) -> Severity {
        self.max(observed)
    }

    /// P0 and P1 block a release.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::P0 | Severity::P1)
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        other.level().cmp(&self.level())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::P3
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.level())
    }
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Pass => write!(f, "pass"),
            Decision::Warn => write!(f, "warn"),
            Decision::Fail => write!(f, "fail"),
        }
    }
}

/// Evaluation tier, ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Deterministic,
    SmallModel,
    LargeModel,
}

impl Stage {
    /// The next, more expensive stage. `LargeModel` is terminal.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Deterministic => Some(Stage::SmallModel),
            Stage::SmallModel => Some(Stage::LargeModel),
            Stage::LargeModel => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Deterministic => "deterministic",
            Stage::SmallModel => "small_model",
            Stage::LargeModel => "large_model",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Machine-readable failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    EmptyAnswer,
    NoContext,
    TokenLimitExceeded,
    LowFaithfulness,
    LowRecall,
    LowPrecision,
    Hallucination,
    TooSlow,
    TooExpensive,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::EmptyAnswer => "EMPTY_ANSWER",
            FailureCode::NoContext => "NO_CONTEXT",
            FailureCode::TokenLimitExceeded => "TOKEN_LIMIT_EXCEEDED",
            FailureCode::LowFaithfulness => "LOW_FAITHFULNESS",
            FailureCode::LowRecall => "LOW_RECALL",
            FailureCode::LowPrecision => "LOW_PRECISION",
            FailureCode::Hallucination => "HALLUCINATION",
            FailureCode::TooSlow => "TOO_SLOW",
            FailureCode::TooExpensive => "TOO_EXPENSIVE",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input defect found by the deterministic stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub code: FailureCode,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(code: FailureCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
        }
    }
}

// ============================================================================
// Canonical input
// ============================================================================

/// Producer framework the evaluation came from. Provenance only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    #[default]
    Raw,
    Langchain,
    LlamaIndex,
}

impl Framework {
    /// Parse a producer-supplied framework tag. Unknown tags map to `Raw`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "langchain" => Framework::Langchain,
            "llama_index" | "llamaindex" => Framework::LlamaIndex,
            _ => Framework::Raw,
        }
    }
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    /// 1-based retrieval rank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,

    /// Retrieval similarity in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl ContextChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: None,
            rank: None,
            score: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// Normalized evaluation record consumed by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvaluation {
    pub query: String,
    pub response: String,

    /// Retrieval order is significant and never re-sorted.
    #[serde(default)]
    pub context_chunks: Vec<ContextChunk>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,

    /// Producer hints: `chunk_size`, `top_k`, `model`, `reranker`, `embedding_model`
    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub framework: Framework,

    pub evaluator_version: String,
    pub policy_version: u32,
    pub judge_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_latency_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_latency_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,

    /// Producer-reported cost of answering this query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<Fixed>,
}

impl CanonicalEvaluation {
    /// String metadata hint, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(JsonValue::as_str)
    }

    /// Model the producer used to generate the response.
    pub fn producer_model(&self) -> Option<&str> {
        self.metadata_str("model").filter(|m| !m.is_empty())
    }

    pub fn context_texts(&self) -> impl Iterator<Item = &str> {
        self.context_chunks.iter().map(|c| c.text.as_str())
    }
}

// ============================================================================
// Metrics and results
// ============================================================================

/// Typed metric map. Absent metrics skip their gate checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faithfulness: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_relevancy: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_precision: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_recall: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hallucination_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_latency_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_query: Option<Fixed>,
}

impl MetricSet {
    /// Quality metrics with all four scores set to `score`.
    pub fn uniform(score: f64) -> Self {
        Self {
            faithfulness: Some(score),
            answer_relevancy: Some(score),
            context_precision: Some(score),
            context_recall: Some(score),
            ..Default::default()
        }
    }

    /// Merge a later stage's metrics over these. Present values win.
    pub fn overlay(&self, later: &MetricSet) -> MetricSet {
        MetricSet {
            faithfulness: later.faithfulness.or(self.faithfulness),
            answer_relevancy: later.answer_relevancy.or(self.answer_relevancy),
            context_precision: later.context_precision.or(self.context_precision),
            context_recall: later.context_recall.or(self.context_recall),
            hallucination_score: later.hallucination_score.or(self.hallucination_score),
            response_latency_ms: later.response_latency_ms.or(self.response_latency_ms),
            total_tokens: later.total_tokens.or(self.total_tokens),
            cost_per_query: later.cost_per_query.or(self.cost_per_query),
        }
    }

    /// The four quality metrics used for confidence, missing ones as 0.5.
    pub fn quality_vector(&self) -> [f64; 4] {
        [
            self.faithfulness.unwrap_or(0.5),
            self.answer_relevancy.unwrap_or(0.5),
            self.context_precision.unwrap_or(0.5),
            self.context_recall.unwrap_or(0.5),
        ]
    }
}

/// Where a stage's scores came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Deterministic rule checks
    Rules,
    /// A real scoring backend
    Backend,
    /// Best-effort synthetic estimate
    Synthetic,
}

/// Accounting for one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub confidence: f64,
    pub cost: Fixed,
    pub tokens: u64,
    pub source: ScoreSource,
}

/// Final output of the staged pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Last stage executed
    pub stage: Stage,
    pub metrics: MetricSet,
    pub issues: Vec<Issue>,
    pub confidence: f64,
    /// Sum of the costs of every executed stage
    pub total_cost: Fixed,
    pub tokens_used: u64,
    pub stages: Vec<StageRecord>,
}

impl PipelineResult {
    pub fn has_p0(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::P0)
    }
}

/// Gate verdict with the codes that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub decision: Decision,
    pub severity: Severity,
    pub failure_codes: Vec<FailureCode>,
}

// ============================================================================
// Autofix
// ============================================================================

/// Pipeline parameter a recommendation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    ChunkSize,
    TopK,
    EmbeddingModel,
    Reranker,
    Model,
}

/// How sure a rule is that its fix helps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixConfidence {
    Low,
    Medium,
    High,
}

/// Remediation suggested by one autofix rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofixRecommendation {
    pub rule_name: String,
    #[serde(rename = "type")]
    pub fix_type: FixType,
    pub current_value: JsonValue,
    pub recommended_value: JsonValue,
    pub expected_improvement: String,
    pub confidence: FixConfidence,
    pub evidence: BTreeMap<String, JsonValue>,
}
