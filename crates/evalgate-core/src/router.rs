//! Confidence-gated escalation between pipeline stages.
//!
//! Stages run `deterministic -> small_model -> large_model`. A stage's
//! verdict stands when its confidence clears the threshold; otherwise the
//! evaluation moves to the next, more expensive stage.

use serde::Serialize;
use std::fmt;

use crate::types::{MetricSet, Stage};

/// Default escalation threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Population variance above which the quality metrics disagree.
pub const DISAGREEMENT_VARIANCE: f64 = 0.15;

/// Why a routing decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    /// Confidence cleared the threshold
    ConfidentAtStage,
    /// Confidence fell short of the threshold
    LowConfidence,
    /// The four quality metrics disagree
    MetricDisagreement,
    /// No further stage exists
    FinalStage,
}

impl fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RoutingReason::ConfidentAtStage => "confidence meets threshold",
            RoutingReason::LowConfidence => "confidence below threshold",
            RoutingReason::MetricDisagreement => "metric disagreement",
            RoutingReason::FinalStage => "final stage reached",
        };
        f.write_str(text)
    }
}

/// Escalation decision for one stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub should_escalate: bool,
    pub reason: RoutingReason,
    pub confidence: f64,
}

impl RoutingDecision {
    fn stop(reason: RoutingReason, confidence: f64) -> Self {
        Self {
            should_escalate: false,
            reason,
            confidence,
        }
    }

    fn escalate(reason: RoutingReason, confidence: f64) -> Self {
        Self {
            should_escalate: true,
            reason,
            confidence,
        }
    }
}

/// Mean and population variance of the four quality metrics.
///
/// Missing metrics count as 0.5.
pub fn metric_spread(metrics: &MetricSet) -> (f64, f64) {
    let scores = metrics.quality_vector();
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Decides whether an evaluation escalates.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceRouter {
    threshold: f64,
}

impl ConfidenceRouter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Route from `stage` given its metrics and confidence.
    pub fn route(&self, stage: Stage, metrics: &MetricSet, confidence: f64) -> RoutingDecision {
        match stage {
            Stage::Deterministic => {
                if confidence >= self.threshold {
                    RoutingDecision::stop(RoutingReason::ConfidentAtStage, confidence)
                } else {
                    RoutingDecision::escalate(RoutingReason::LowConfidence, confidence)
                }
            }
            Stage::SmallModel => {
                if self.has_disagreement(metrics) {
                    RoutingDecision::escalate(RoutingReason::MetricDisagreement, confidence)
                } else if confidence >= self.threshold {
                    RoutingDecision::stop(RoutingReason::ConfidentAtStage, confidence)
                } else {
                    RoutingDecision::escalate(RoutingReason::LowConfidence, confidence)
                }
            }
            Stage::LargeModel => RoutingDecision::stop(RoutingReason::FinalStage, 1.0),
        }
    }

    /// Whether the quality metrics disagree enough to force escalation.
    pub fn has_disagreement(&self, metrics: &MetricSet) -> bool {
        metric_spread(metrics).1 > DISAGREEMENT_VARIANCE
    }

    /// Confidence from metric agreement and extremity.
    ///
    /// Low variance maps to higher confidence by fixed bands; a mean above
    /// 0.9 or below 0.3 adds 0.1, capped at 1.0.
    pub fn calculate_confidence(&self, metrics: &MetricSet) -> f64 {
        let (mean, variance) = metric_spread(metrics);

        let base = if variance < 0.05 {
            0.9
        } else if variance < 0.10 {
            0.8
        } else if variance < 0.15 {
            0.7
        } else {
            0.5
        };

        if mean > 0.9 || mean < 0.3 {
            f64::min(1.0, base + 0.1)
        } else {
            base
        }
    }
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
