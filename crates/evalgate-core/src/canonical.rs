//! Input normalization into [`CanonicalEvaluation`].
//!
//! Accepts the raw request shape (flat context strings or pre-ranked
//! chunks) and producer payloads from LangChain and LlamaIndex callbacks.
//! Normalization never fails and never reorders chunks; defective input is
//! left for the deterministic stage to report.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed;
use crate::types::{CanonicalEvaluation, ContextChunk, Framework, Metadata};

/// Evaluator version stamped on records by default.
pub const DEFAULT_EVALUATOR_VERSION: &str = "3";

/// Judge model used when neither config nor metadata names one.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

/// Raw evaluation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub query: String,
    pub response: String,

    /// Flat context strings, in retrieval order
    #[serde(default)]
    pub context: Option<Vec<String>>,

    /// Pre-ranked chunks; preferred over `context` when non-empty
    #[serde(default)]
    pub context_chunks: Option<Vec<ContextChunk>>,

    #[serde(default)]
    pub ground_truth: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub retrieval_latency_ms: Option<u64>,

    #[serde(default)]
    pub generation_latency_ms: Option<u64>,

    #[serde(default)]
    pub total_latency_ms: Option<u64>,

    #[serde(default)]
    pub total_cost: Option<Fixed>,
}

/// Callback payload emitted by a framework integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerPayload {
    pub query: String,
    pub response: String,
    #[serde(default)]
    pub context_chunks: Vec<ContextChunk>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Values stamped onto records the input does not override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDefaults {
    pub evaluator_version: String,
    pub judge_model: String,
    pub policy_version: u32,
}

impl Default for CanonicalDefaults {
    fn default() -> Self {
        Self {
            evaluator_version: DEFAULT_EVALUATOR_VERSION.to_string(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            policy_version: 1,
        }
    }
}

/// Builds canonical records from heterogeneous inputs.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    defaults: CanonicalDefaults,
}

impl Canonicalizer {
    pub fn new(defaults: CanonicalDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &CanonicalDefaults {
        &self.defaults
    }

    /// Normalize a raw request.
    ///
    /// Metadata keys `framework` and `judge_model` override the defaults.
    pub fn normalize(&self, input: EvaluationInput) -> CanonicalEvaluation {
        let context_chunks = match (input.context_chunks, input.context) {
            (Some(chunks), _) if !chunks.is_empty() => finite_scores(chunks),
            (_, Some(texts)) => flat_chunks(texts),
            _ => Vec::new(),
        };

        let framework = input
            .metadata
            .get("framework")
            .and_then(|v| v.as_str())
            .map(Framework::from_tag)
            .unwrap_or_default();

        let judge_model = input
            .metadata
            .get("judge_model")
            .and_then(|v| v.as_str())
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.defaults.judge_model.clone());

        CanonicalEvaluation {
            query: input.query,
            response: input.response,
            context_chunks,
            ground_truth: input.ground_truth,
            metadata: input.metadata,
            framework,
            evaluator_version: self.defaults.evaluator_version.clone(),
            policy_version: self.defaults.policy_version,
            judge_model,
            project_id: input.project_id,
            retrieval_latency_ms: input.retrieval_latency_ms,
            generation_latency_ms: input.generation_latency_ms,
            total_latency_ms: input.total_latency_ms,
            total_cost: input.total_cost,
        }
    }

    /// Normalize a LangChain callback payload.
    pub fn from_langchain(&self, payload: ProducerPayload) -> CanonicalEvaluation {
        self.from_producer(payload, Framework::Langchain)
    }

    /// Normalize a LlamaIndex event payload.
    pub fn from_llama_index(&self, payload: ProducerPayload) -> CanonicalEvaluation {
        self.from_producer(payload, Framework::LlamaIndex)
    }

    fn from_producer(&self, payload: ProducerPayload, framework: Framework) -> CanonicalEvaluation {
        CanonicalEvaluation {
            query: payload.query,
            response: payload.response,
            context_chunks: finite_scores(payload.context_chunks),
            ground_truth: None,
            metadata: payload.metadata,
            framework,
            evaluator_version: self.defaults.evaluator_version.clone(),
            policy_version: self.defaults.policy_version,
            judge_model: self.defaults.judge_model.clone(),
            project_id: payload.project_id,
            retrieval_latency_ms: None,
            generation_latency_ms: None,
            total_latency_ms: None,
            total_cost: None,
        }
    }
}

/// NaN and infinite retrieval scores carry no ranking signal; they read as
/// unscored.
fn finite_scores(mut chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    for chunk in &mut chunks {
        if chunk.score.is_some_and(|s| !s.is_finite()) {
            tracing::debug!(source_id = ?chunk.source_id, "Dropping non-finite chunk score");
            chunk.score = None;
        }
    }
    chunks
}

fn flat_chunks(texts: Vec<String>) -> Vec<ContextChunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            ContextChunk::new(text)
                .with_rank(i as u32 + 1)
                .with_source(format!("chunk_{}", i))
        })
        .collect()
}
