//! Scoring backend trait and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use evalgate_core::{CanonicalEvaluation, Fixed, MetricSet, ScoreSource};

use crate::providers::ProviderError;

/// Errors from a scoring backend. The judge absorbs all of them.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Judge returned an invalid verdict: {0}")]
    InvalidVerdict(String),

    /// The provider answered (and billed) but the verdict was unusable.
    #[error("Judge returned an unusable verdict: {reason}")]
    UnusableVerdict {
        reason: String,
        tokens_used: u64,
        cost: Fixed,
    },

    #[error("Circuit open for {model}")]
    CircuitOpen { model: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl JudgeError {
    /// Tokens and cost already billed before the failure.
    pub fn spent(&self) -> Option<(u64, Fixed)> {
        match self {
            JudgeError::UnusableVerdict {
                tokens_used, cost, ..
            } => Some((*tokens_used, *cost)),
            _ => None,
        }
    }
}

/// The five judged quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgeScores {
    pub faithfulness: f64,
    pub answer_relevancy: f64,
    pub context_precision: f64,
    pub context_recall: f64,
    pub hallucination_score: f64,
}

impl JudgeScores {
    /// Every metric clamped into [0, 1]; NaN reads as 0.
    pub fn clamped(self) -> Self {
        fn unit(v: f64) -> f64 {
            if v.is_nan() {
                0.0
            } else {
                v.clamp(0.0, 1.0)
            }
        }
        Self {
            faithfulness: unit(self.faithfulness),
            answer_relevancy: unit(self.answer_relevancy),
            context_precision: unit(self.context_precision),
            context_recall: unit(self.context_recall),
            hallucination_score: unit(self.hallucination_score),
        }
    }

    pub fn to_metrics(&self) -> MetricSet {
        MetricSet {
            faithfulness: Some(self.faithfulness),
            answer_relevancy: Some(self.answer_relevancy),
            context_precision: Some(self.context_precision),
            context_recall: Some(self.context_recall),
            hallucination_score: Some(self.hallucination_score),
            ..Default::default()
        }
    }
}

/// What one judge stage produced and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeOutcome {
    pub scores: JudgeScores,
    pub tokens_used: u64,
    pub cost: Fixed,
    pub source: ScoreSource,
}

/// Produces quality scores for a canonical evaluation.
///
/// Implementations may fail freely; `QualityJudge` turns every failure into
/// a synthetic estimate.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    async fn score(
        &self,
        canonical: &CanonicalEvaluation,
        model: &str,
    ) -> Result<JudgeOutcome, JudgeError>;

    /// Called when the judge gave up waiting on `score` for `model`.
    ///
    /// The `score` future has been dropped by then, so anything it would
    /// have recorded on failure must be recorded here.
    fn record_timeout(&self, _model: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped() {
        let scores = JudgeScores {
            faithfulness: 1.4,
            answer_relevancy: -0.2,
            context_precision: f64::NAN,
            context_recall: 0.5,
            hallucination_score: 0.1,
        }
        .clamped();
        assert_eq!(scores.faithfulness, 1.0);
        assert_eq!(scores.answer_relevancy, 0.0);
        assert_eq!(scores.context_precision, 0.0);
        assert_eq!(scores.context_recall, 0.5);
    }

    #[test]
    fn test_to_metrics_leaves_operational_fields_empty() {
        let metrics = JudgeScores {
            faithfulness: 0.9,
            answer_relevancy: 0.8,
            context_precision: 0.7,
            context_recall: 0.6,
            hallucination_score: 0.1,
        }
        .to_metrics();
        assert_eq!(metrics.faithfulness, Some(0.9));
        assert_eq!(metrics.hallucination_score, Some(0.1));
        assert!(metrics.total_tokens.is_none());
        assert!(metrics.cost_per_query.is_none());
    }
}
