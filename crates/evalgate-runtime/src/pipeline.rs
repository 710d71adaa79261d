//! Multi-stage evaluation pipeline.
//!
//! Stages run strictly in order and only while the router asks for more:
//! - Stage 1: deterministic checks (free, always runs)
//! - Stage 2: small-model judge
//! - Stage 3: large-model judge (authoritative)
//!
//! A P0 issue at Stage 1 ends the evaluation immediately. Judges never fail,
//! so neither does the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use evalgate_core::{
    CanonicalEvaluation, ConfidenceRouter, CostAccountant, DeterministicChecker,
    DeterministicResult, Fixed, MetricSet, PipelineResult, ScoreSource, Stage, StageRecord,
};

use crate::config::{ConfigError, RuntimeConfig};
use crate::judges::{JudgeSet, ScoringBackend};
use crate::providers::ProviderSet;

/// Runs Stage 1 and escalates through the judge stages.
#[derive(Debug)]
pub struct MultiStageEvaluationPipeline {
    config: Arc<RuntimeConfig>,
    checker: DeterministicChecker,
    router: ConfidenceRouter,
    judges: JudgeSet,
}

impl MultiStageEvaluationPipeline {
    pub fn builder(config: Arc<RuntimeConfig>) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn router(&self) -> &ConfidenceRouter {
        &self.router
    }

    pub fn judges(&self) -> &JudgeSet {
        &self.judges
    }

    /// Evaluate one canonical record.
    ///
    /// Stage 2 judges with the record's `judge_model`; Stage 3 with the
    /// configured large model. Latency, token and cost metrics always come
    /// from Stage 1, whatever the judges report.
    pub async fn evaluate(&self, canonical: &CanonicalEvaluation) -> PipelineResult {
        let stage1 = self.checker.check(canonical);
        let mut stages = vec![StageRecord {
            stage: Stage::Deterministic,
            confidence: stage1.confidence,
            cost: Fixed::ZERO,
            tokens: stage1.tokens_counted,
            source: ScoreSource::Rules,
        }];

        if stage1.has_p0() {
            tracing::info!(
                stage = %Stage::Deterministic,
                issues = stage1.issues.len(),
                "P0 issue found, skipping judges"
            );
            return PipelineResult {
                stage: Stage::Deterministic,
                metrics: stage1.metrics,
                issues: stage1.issues,
                confidence: 1.0,
                total_cost: Fixed::ZERO,
                tokens_used: stage1.tokens_counted,
                stages,
            };
        }

        let DeterministicResult {
            issues,
            metrics: pinned,
            confidence,
            tokens_counted,
        } = stage1;

        let mut stage = Stage::Deterministic;
        let mut metrics = pinned.clone();
        let mut confidence = confidence;
        let mut total_cost = Fixed::ZERO;
        let mut tokens_used = tokens_counted;

        loop {
            let decision = self.router.route(stage, &metrics, confidence);
            if !decision.should_escalate {
                tracing::debug!(
                    stage = %stage,
                    confidence,
                    reason = %decision.reason,
                    "Stopping"
                );
                break;
            }
            let Some(next) = stage.next() else {
                break;
            };

            let model = match next {
                Stage::LargeModel => self.config.large_model.as_str(),
                _ => canonical.judge_model.as_str(),
            };
            tracing::info!(
                stage = %next,
                judge_model = %model,
                confidence,
                reason = %decision.reason,
                "Escalating"
            );

            let outcome = self.judges.judge(next, model).evaluate(canonical).await;

            metrics = pin_operational(metrics.overlay(&outcome.scores.to_metrics()), &pinned);
            confidence = match next {
                Stage::LargeModel => 1.0,
                _ => self.router.calculate_confidence(&metrics),
            };
            total_cost += outcome.cost;
            tokens_used += outcome.tokens_used;

            stages.push(StageRecord {
                stage: next,
                confidence,
                cost: outcome.cost,
                tokens: outcome.tokens_used,
                source: outcome.source,
            });
            stage = next;
        }

        PipelineResult {
            stage,
            metrics,
            issues,
            confidence,
            total_cost,
            tokens_used,
            stages,
        }
    }

    /// Fit a stored result for the same content to a new request.
    ///
    /// Judged metrics, issues and costs are kept; operational metrics are
    /// re-measured from `canonical`.
    pub fn reuse(&self, canonical: &CanonicalEvaluation, stored: PipelineResult) -> PipelineResult {
        let stage1 = self.checker.check(canonical);
        PipelineResult {
            metrics: pin_operational(stored.metrics, &stage1.metrics),
            ..stored
        }
    }
}

/// Operational metrics are measured once, at Stage 1.
fn pin_operational(mut metrics: MetricSet, stage1: &MetricSet) -> MetricSet {
    metrics.response_latency_ms = stage1.response_latency_ms;
    metrics.total_tokens = stage1.total_tokens;
    metrics.cost_per_query = stage1.cost_per_query;
    metrics
}

/// Builder for [`MultiStageEvaluationPipeline`].
pub struct PipelineBuilder {
    config: Arc<RuntimeConfig>,
    costs: Option<CostAccountant>,
    providers: ProviderSet,
    backends: BTreeMap<String, Arc<dyn ScoringBackend>>,
}

impl PipelineBuilder {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            config,
            costs: None,
            providers: ProviderSet::new(),
            backends: BTreeMap::new(),
        }
    }

    /// Use this accountant instead of loading the configured price table.
    pub fn costs(mut self, costs: CostAccountant) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    /// Score `model` with `backend`, bypassing provider lookup.
    pub fn backend(mut self, model: impl Into<String>, backend: Arc<dyn ScoringBackend>) -> Self {
        self.backends.insert(model.into(), backend);
        self
    }

    pub fn build(self) -> Result<MultiStageEvaluationPipeline, ConfigError> {
        let costs = match self.costs {
            Some(costs) => costs,
            None => self.config.cost_accountant()?,
        };
        let checker =
            DeterministicChecker::new(costs.clone()).with_max_total_tokens(self.config.max_total_tokens);
        let router = ConfidenceRouter::new(self.config.confidence_threshold);
        let judges = JudgeSet::new(self.config.clone(), costs, self.providers, self.backends);

        Ok(MultiStageEvaluationPipeline {
            config: self.config,
            checker,
            router,
            judges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalgate_core::{Canonicalizer, EvaluationInput};

    fn pipeline() -> MultiStageEvaluationPipeline {
        MultiStageEvaluationPipeline::builder(Arc::new(RuntimeConfig::default()))
            .costs(CostAccountant::builtin())
            .build()
            .unwrap()
    }

    fn canonical(response: &str, context: Vec<&str>) -> CanonicalEvaluation {
        Canonicalizer::default().normalize(EvaluationInput {
            query: "What is the refund window for online orders?".to_string(),
            response: response.to_string(),
            context: Some(context.into_iter().map(str::to_string).collect()),
            total_latency_ms: Some(840),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_p0_stops_at_stage_one() {
        let result = pipeline()
            .evaluate(&canonical("", vec!["Refunds are accepted within 30 days."]))
            .await;

        assert_eq!(result.stage, Stage::Deterministic);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.total_cost, Fixed::ZERO);
        assert_eq!(result.stages.len(), 1);
        assert!(result.has_p0());
    }

    #[tokio::test]
    async fn test_synthetic_run_accounts_every_stage() {
        let result = pipeline()
            .evaluate(&canonical(
                "Online orders can be refunded within 30 days of delivery.",
                vec!["Refunds are accepted within 30 days of delivery for online orders."],
            ))
            .await;

        assert_ne!(result.stage, Stage::Deterministic);
        assert!(result.total_cost > Fixed::ZERO);

        let summed: Fixed = result.stages.iter().map(|s| s.cost).sum();
        assert_eq!(summed, result.total_cost);
        let tokens: u64 = result.stages.iter().map(|s| s.tokens).sum();
        assert_eq!(tokens, result.tokens_used);

        assert_eq!(result.metrics.response_latency_ms, Some(840));
        assert!(result.metrics.faithfulness.is_some());
        assert!(result.stages[1..]
            .iter()
            .all(|s| s.source == ScoreSource::Synthetic));
    }

    #[tokio::test]
    async fn test_low_threshold_stops_before_judging() {
        let config = RuntimeConfig {
            confidence_threshold: 0.6,
            ..Default::default()
        };
        let pipeline = MultiStageEvaluationPipeline::builder(Arc::new(config))
            .costs(CostAccountant::builtin())
            .build()
            .unwrap();

        let result = pipeline
            .evaluate(&canonical(
                "Online orders can be refunded within 30 days of delivery.",
                vec!["Refunds are accepted within 30 days of delivery for online orders."],
            ))
            .await;
        assert_eq!(result.stage, Stage::Deterministic);
        assert_eq!(result.total_cost, Fixed::ZERO);
    }

    #[test]
    fn test_pin_operational() {
        let stage1 = MetricSet {
            response_latency_ms: Some(120),
            total_tokens: Some(900),
            ..Default::default()
        };
        let judged = MetricSet {
            total_tokens: Some(5),
            ..MetricSet::uniform(0.9)
        };
        let pinned = pin_operational(judged, &stage1);
        assert_eq!(pinned.total_tokens, Some(900));
        assert_eq!(pinned.response_latency_ms, Some(120));
        assert_eq!(pinned.cost_per_query, None);
        assert_eq!(pinned.faithfulness, Some(0.9));
    }

    #[tokio::test]
    async fn test_reuse_remeasures_operational_metrics() {
        let pipeline = pipeline();
        let first = canonical(
            "Online orders can be refunded within 30 days of delivery.",
            vec!["Refunds are accepted within 30 days of delivery for online orders."],
        );
        let stored = pipeline.evaluate(&first).await;

        let mut second = first.clone();
        second.total_latency_ms = Some(7200);
        let reused = pipeline.reuse(&second, stored.clone());

        assert_eq!(reused.metrics.response_latency_ms, Some(7200));
        assert_eq!(reused.metrics.faithfulness, stored.metrics.faithfulness);
        assert_eq!(reused.total_cost, stored.total_cost);
        assert_eq!(reused.stages, stored.stages);
    }
}
