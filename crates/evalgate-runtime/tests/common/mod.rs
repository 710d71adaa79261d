//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use evalgate_core::{CanonicalEvaluation, CostAccountant, EvaluationInput, ScoreSource};
use evalgate_runtime::{JudgeError, JudgeOutcome, JudgeScores, ScoringBackend};

pub const PROMPT_TOKENS: u64 = 1000;
pub const OUTPUT_TOKENS: u64 = 100;

/// Backend that always returns the same scores, priced like a real call.
pub struct ScriptedBackend {
    scores: JudgeScores,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(scores: JudgeScores) -> Arc<Self> {
        Arc::new(Self {
            scores,
            calls: AtomicU32::new(0),
        })
    }

    pub fn uniform(score: f64) -> Arc<Self> {
        Self::new(scores(score, score, score, score, 0.05))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn score(
        &self,
        _canonical: &CanonicalEvaluation,
        model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(JudgeOutcome {
            scores: self.scores,
            tokens_used: PROMPT_TOKENS + OUTPUT_TOKENS,
            cost: CostAccountant::builtin().cost(model, PROMPT_TOKENS, OUTPUT_TOKENS),
            source: ScoreSource::Backend,
        })
    }
}

/// Backend whose every call fails.
pub struct FailingBackend;

#[async_trait]
impl ScoringBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn score(
        &self,
        _canonical: &CanonicalEvaluation,
        _model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        Err(JudgeError::InvalidVerdict("not json".to_string()))
    }
}

pub fn scores(
    faithfulness: f64,
    answer_relevancy: f64,
    context_precision: f64,
    context_recall: f64,
    hallucination_score: f64,
) -> JudgeScores {
    JudgeScores {
        faithfulness,
        answer_relevancy,
        context_precision,
        context_recall,
        hallucination_score,
    }
}

/// A well-formed request that passes every Stage 1 check.
pub fn refund_request() -> EvaluationInput {
    EvaluationInput {
        query: "What is the refund window for online orders?".to_string(),
        response: "Online orders can be refunded within 30 days of delivery.".to_string(),
        context: Some(vec![
            "Refunds are accepted within 30 days of delivery for online orders.".to_string(),
            "In-store purchases follow the same 30 day policy.".to_string(),
        ]),
        project_id: Some("proj-support".to_string()),
        ..Default::default()
    }
}
