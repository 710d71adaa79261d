//! Stage 2/3 quality judges.
//!
//! A [`QualityJudge`] owns one [`ScoringBackend`], chosen once when the
//! judge is built, plus the synthetic estimator it falls back to. Judging
//! never fails: backend errors and stage timeouts are logged and replaced by
//! the synthetic estimate.

mod backend;
mod llm;
mod synthetic;

pub use backend::{JudgeError, JudgeOutcome, JudgeScores, ScoringBackend};
pub use llm::{parse_verdict, LlmJudgeBackend};
pub use synthetic::SyntheticBackend;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use evalgate_core::{CanonicalEvaluation, CostAccountant, Fixed, Stage};

use crate::config::RuntimeConfig;
use crate::providers::ProviderSet;
use crate::resilience::CircuitBreaker;

/// One judge stage bound to one model.
pub struct QualityJudge {
    stage: Stage,
    model: String,
    backend: Arc<dyn ScoringBackend>,
    fallback: SyntheticBackend,
    timeout: Duration,
}

impl QualityJudge {
    pub fn new(
        stage: Stage,
        model: impl Into<String>,
        backend: Arc<dyn ScoringBackend>,
        fallback: SyntheticBackend,
        timeout: Duration,
    ) -> Self {
        Self {
            stage,
            model: model.into(),
            backend,
            fallback,
            timeout,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Score `canonical`. Always returns an outcome.
    ///
    /// A fallback reports what a failed backend call already billed, when
    /// it billed anything, instead of the synthetic estimate's cost.
    pub async fn evaluate(&self, canonical: &CanonicalEvaluation) -> JudgeOutcome {
        let scored =
            tokio::time::timeout(self.timeout, self.backend.score(canonical, &self.model)).await;

        match scored {
            Ok(Ok(outcome)) => JudgeOutcome {
                scores: outcome.scores.clamped(),
                ..outcome
            },
            Ok(Err(e)) => {
                tracing::warn!(
                    stage = %self.stage,
                    judge_model = %self.model,
                    backend = %self.backend.name(),
                    error = %e,
                    "Judge backend failed, using synthetic estimate"
                );
                self.fallback(canonical, e.spent())
            }
            Err(_) => {
                self.backend.record_timeout(&self.model);
                tracing::warn!(
                    stage = %self.stage,
                    judge_model = %self.model,
                    backend = %self.backend.name(),
                    timeout = ?self.timeout,
                    "Judge timed out, using synthetic estimate"
                );
                self.fallback(canonical, None)
            }
        }
    }

    fn fallback(&self, canonical: &CanonicalEvaluation, spent: Option<(u64, Fixed)>) -> JudgeOutcome {
        let estimate = self.fallback.estimate(canonical, &self.model);
        match spent {
            Some((tokens_used, cost)) => JudgeOutcome {
                tokens_used,
                cost,
                ..estimate
            },
            None => estimate,
        }
    }
}

impl std::fmt::Debug for QualityJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityJudge")
            .field("stage", &self.stage)
            .field("model", &self.model)
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builds and caches one judge per (stage, model).
///
/// Backend choice, in order: an explicit backend registered for the model,
/// an LLM backend when a provider serves the model's vendor, otherwise the
/// synthetic backend.
pub struct JudgeSet {
    config: Arc<RuntimeConfig>,
    costs: CostAccountant,
    providers: ProviderSet,
    backends: BTreeMap<String, Arc<dyn ScoringBackend>>,
    breaker: Arc<CircuitBreaker>,
    judges: RwLock<HashMap<(Stage, String), Arc<QualityJudge>>>,
}

impl JudgeSet {
    pub fn new(
        config: Arc<RuntimeConfig>,
        costs: CostAccountant,
        providers: ProviderSet,
        backends: BTreeMap<String, Arc<dyn ScoringBackend>>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        Self {
            config,
            costs,
            providers,
            backends,
            breaker,
            judges: RwLock::new(HashMap::new()),
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The judge for `stage` with `model`, built on first use.
    ///
    /// Models with no registered backend, no price and no configured role
    /// are judged by the stage's configured model instead, so the set of
    /// judges stays bounded by configuration.
    pub fn judge(&self, stage: Stage, model: &str) -> Arc<QualityJudge> {
        let model = self.resolve_model(stage, model);
        let key = (stage, model.to_string());
        if let Some(judge) = self.judges.read().get(&key) {
            return judge.clone();
        }

        let mut judges = self.judges.write();
        judges
            .entry(key)
            .or_insert_with(|| Arc::new(self.build(stage, model)))
            .clone()
    }

    /// Number of judges built so far.
    pub fn len(&self) -> usize {
        self.judges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.read().is_empty()
    }

    fn resolve_model<'a>(&'a self, stage: Stage, model: &'a str) -> &'a str {
        let known = self.backends.contains_key(model)
            || self.costs.knows(model)
            || model == self.config.small_model
            || model == self.config.large_model;
        if known {
            return model;
        }

        let substitute = match stage {
            Stage::LargeModel => self.config.large_model.as_str(),
            _ => self.config.small_model.as_str(),
        };
        tracing::warn!(
            stage = %stage,
            judge_model = %model,
            substitute = %substitute,
            "Unknown judge model, using configured model"
        );
        substitute
    }

    fn build(&self, stage: Stage, model: &str) -> QualityJudge {
        let fallback = SyntheticBackend::new(self.costs.clone(), self.config.judge_output_tokens);
        let timeout = match stage {
            Stage::LargeModel => self.config.stage_timeouts.large,
            _ => self.config.stage_timeouts.small,
        };

        let backend: Arc<dyn ScoringBackend> = if let Some(backend) = self.backends.get(model) {
            backend.clone()
        } else if let Some(provider) = self.providers.for_model(model) {
            Arc::new(
                LlmJudgeBackend::new(provider, self.costs.clone(), self.breaker.clone())
                    .with_retry(self.config.retry.clone())
                    .with_max_output_tokens(self.config.judge_output_tokens)
                    .with_request_timeout(timeout / self.config.retry.max_attempts.max(1)),
            )
        } else {
            Arc::new(fallback.clone())
        };

        tracing::info!(
            stage = %stage,
            judge_model = %model,
            backend = %backend.name(),
            "Judge constructed"
        );

        QualityJudge::new(stage, model, backend, fallback, timeout)
    }
}

impl std::fmt::Debug for JudgeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeSet")
            .field("providers", &self.providers)
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("judges", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::providers::{
        ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    };
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use evalgate_core::{Canonicalizer, EvaluationInput, ScoreSource};

    struct FixedScores(JudgeScores);

    #[async_trait]
    impl ScoringBackend for FixedScores {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(
            &self,
            _canonical: &CanonicalEvaluation,
            _model: &str,
        ) -> Result<JudgeOutcome, JudgeError> {
            Ok(JudgeOutcome {
                scores: self.0,
                tokens_used: 900,
                cost: "0.0004".parse().unwrap(),
                source: ScoreSource::Backend,
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl ScoringBackend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn score(
            &self,
            _canonical: &CanonicalEvaluation,
            _model: &str,
        ) -> Result<JudgeOutcome, JudgeError> {
            Err(JudgeError::InvalidVerdict("garbage".to_string()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl ScoringBackend for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn score(
            &self,
            _canonical: &CanonicalEvaluation,
            _model: &str,
        ) -> Result<JudgeOutcome, JudgeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(JudgeError::Timeout(Duration::from_secs(3600)))
        }
    }

    fn canonical() -> CanonicalEvaluation {
        Canonicalizer::default().normalize(EvaluationInput {
            query: "What is the refund window?".to_string(),
            response: "Thirty days from purchase.".to_string(),
            context: Some(vec!["Refunds are accepted within 30 days.".to_string()]),
            ..Default::default()
        })
    }

    fn judge(backend: Arc<dyn ScoringBackend>) -> QualityJudge {
        QualityJudge::new(
            Stage::SmallModel,
            "gpt-4o-mini",
            backend,
            SyntheticBackend::new(CostAccountant::builtin(), 500),
            Duration::from_secs(15),
        )
    }

    #[tokio::test]
    async fn test_backend_scores_are_clamped() {
        let scores = JudgeScores {
            faithfulness: 1.3,
            answer_relevancy: 0.9,
            context_precision: 0.9,
            context_recall: 0.9,
            hallucination_score: -0.1,
        };
        let outcome = judge(Arc::new(FixedScores(scores))).evaluate(&canonical()).await;
        assert_eq!(outcome.source, ScoreSource::Backend);
        assert_eq!(outcome.scores.faithfulness, 1.0);
        assert_eq!(outcome.scores.hallucination_score, 0.0);
        assert_eq!(outcome.cost, "0.0004".parse::<Fixed>().unwrap());
    }

    #[tokio::test]
    async fn test_backend_error_falls_back_to_synthetic() {
        let outcome = judge(Arc::new(Failing)).evaluate(&canonical()).await;
        assert_eq!(outcome.source, ScoreSource::Synthetic);

        let expected = SyntheticBackend::new(CostAccountant::builtin(), 500)
            .estimate(&canonical(), "gpt-4o-mini");
        assert_eq!(outcome, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_synthetic() {
        let outcome = judge(Arc::new(Stalled)).evaluate(&canonical()).await;
        assert_eq!(outcome.source, ScoreSource::Synthetic);
    }

    #[test]
    fn test_judge_set_prefers_explicit_backend() {
        let mut backends: BTreeMap<String, Arc<dyn ScoringBackend>> = BTreeMap::new();
        backends.insert("gpt-4o".to_string(), Arc::new(Failing));
        let set = JudgeSet::new(
            Arc::new(RuntimeConfig::default()),
            CostAccountant::builtin(),
            ProviderSet::new(),
            backends,
        );

        assert_eq!(set.judge(Stage::LargeModel, "gpt-4o").backend_name(), "failing");
        assert_eq!(
            set.judge(Stage::SmallModel, "gpt-4o-mini").backend_name(),
            "synthetic"
        );
    }

    #[test]
    fn test_judge_set_reuses_judges_and_applies_stage_timeouts() {
        let set = JudgeSet::new(
            Arc::new(RuntimeConfig::default()),
            CostAccountant::builtin(),
            ProviderSet::new(),
            BTreeMap::new(),
        );
        let a = set.judge(Stage::SmallModel, "gpt-4o-mini");
        let b = set.judge(Stage::SmallModel, "gpt-4o-mini");
        assert!(Arc::ptr_eq(&a, &b));

        let large = set.judge(Stage::LargeModel, "gpt-4o");
        assert_eq!(large.timeout, Duration::from_secs(45));
        assert_eq!(a.timeout, Duration::from_secs(15));
    }

    struct BilledGarbage;

    #[async_trait]
    impl ScoringBackend for BilledGarbage {
        fn name(&self) -> &str {
            "billed-garbage"
        }

        async fn score(
            &self,
            _canonical: &CanonicalEvaluation,
            _model: &str,
        ) -> Result<JudgeOutcome, JudgeError> {
            Err(JudgeError::UnusableVerdict {
                reason: "not json".to_string(),
                tokens_used: 1280,
                cost: "0.000228".parse().unwrap(),
            })
        }
    }

    struct HungProvider;

    #[async_trait]
    impl LlmProvider for HungProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::HttpError("unreachable".to_string()))
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "hung"
        }
    }

    #[tokio::test]
    async fn test_fallback_reports_billed_spend() {
        let outcome = judge(Arc::new(BilledGarbage)).evaluate(&canonical()).await;

        assert_eq!(outcome.source, ScoreSource::Synthetic);
        assert_eq!(outcome.tokens_used, 1280);
        assert_eq!(outcome.cost, "0.000228".parse::<Fixed>().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_counts_against_circuit() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }));
        // Attempts outlive the stage, so only the judge's own timeout fires
        let backend = LlmJudgeBackend::new(
            Arc::new(HungProvider),
            CostAccountant::builtin(),
            breaker.clone(),
        )
        .with_request_timeout(Duration::from_secs(600));
        let judge = QualityJudge::new(
            Stage::SmallModel,
            "gpt-4o-mini",
            Arc::new(backend),
            SyntheticBackend::new(CostAccountant::builtin(), 500),
            Duration::from_secs(1),
        );

        for _ in 0..2 {
            let outcome = judge.evaluate(&canonical()).await;
            assert_eq!(outcome.source, ScoreSource::Synthetic);
        }
        assert!(matches!(
            breaker.state("gpt-4o-mini"),
            CircuitState::Open { .. }
        ));
    }

    #[test]
    fn test_unknown_judge_models_use_configured_model() {
        let set = JudgeSet::new(
            Arc::new(RuntimeConfig::default()),
            CostAccountant::builtin(),
            ProviderSet::new(),
            BTreeMap::new(),
        );

        for i in 0..50 {
            let judge = set.judge(Stage::SmallModel, &format!("made-up-model-{}", i));
            assert_eq!(judge.model(), "gpt-4o-mini");
        }
        assert_eq!(set.len(), 1);

        let priced = set.judge(Stage::SmallModel, "claude-3-5-haiku-20241022");
        assert_eq!(priced.model(), "claude-3-5-haiku-20241022");
        assert_eq!(set.len(), 2);
    }
}
