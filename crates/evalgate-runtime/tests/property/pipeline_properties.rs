//! Stage accounting across full pipeline runs.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;

use evalgate_core::{
    CanonicalEvaluation, Canonicalizer, CostAccountant, EvaluationInput, Fixed, ScoreSource,
};
use evalgate_runtime::{
    JudgeError, JudgeOutcome, JudgeScores, MultiStageEvaluationPipeline, RuntimeConfig,
    ScoringBackend,
};

/// Replays one scripted outcome for every call.
struct Replay(JudgeOutcome);

#[async_trait]
impl ScoringBackend for Replay {
    fn name(&self) -> &str {
        "replay"
    }

    async fn score(
        &self,
        _canonical: &CanonicalEvaluation,
        _model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        Ok(self.0.clone())
    }
}

fn arb_outcome() -> impl Strategy<Value = JudgeOutcome> {
    (
        prop::array::uniform5(0.0f64..=1.0),
        0u64..50_000,
        0i128..50_000_000_000_000,
    )
        .prop_map(|(s, tokens_used, raw_cost)| JudgeOutcome {
            scores: JudgeScores {
                faithfulness: s[0],
                answer_relevancy: s[1],
                context_precision: s[2],
                context_recall: s[3],
                hallucination_score: s[4],
            },
            tokens_used,
            cost: Fixed::from_raw(raw_cost),
            source: ScoreSource::Backend,
        })
}

fn request(response: String, latency: Option<u64>) -> EvaluationInput {
    EvaluationInput {
        query: "What is the refund window for online orders?".to_string(),
        response,
        context: Some(vec![
            "Refunds are accepted within 30 days of delivery for online orders.".to_string(),
        ]),
        total_latency_ms: latency,
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn pipeline_totals_equal_stage_sums(
        small in arb_outcome(),
        large in arb_outcome(),
        threshold in 0.5f64..=1.0,
        response in prop_oneof!["", "[a-z ]{0,8}", "[A-Za-z ,.]{20,120}"],
        latency in prop::option::of(0u64..10_000),
    ) {
        let config = Arc::new(RuntimeConfig {
            confidence_threshold: threshold,
            ..RuntimeConfig::default()
        });
        let pipeline = MultiStageEvaluationPipeline::builder(config.clone())
            .costs(CostAccountant::builtin())
            .backend("gpt-4o-mini", Arc::new(Replay(small)))
            .backend("gpt-4o", Arc::new(Replay(large)))
            .build()
            .unwrap();
        let canonical =
            Canonicalizer::new(config.canonical_defaults()).normalize(request(response, latency));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let result = runtime.block_on(pipeline.evaluate(&canonical));

        let cost: Fixed = result.stages.iter().map(|s| s.cost).sum();
        let tokens: u64 = result.stages.iter().map(|s| s.tokens).sum();
        prop_assert_eq!(cost, result.total_cost);
        prop_assert_eq!(tokens, result.tokens_used);

        prop_assert!(result.stages[0].cost.is_zero());
        prop_assert_eq!(result.stages.last().map(|s| s.stage), Some(result.stage));
        let stages: Vec<_> = result.stages.iter().map(|s| s.stage).collect();
        let mut ordered = stages.clone();
        ordered.sort();
        ordered.dedup();
        prop_assert_eq!(stages, ordered);
    }
}
