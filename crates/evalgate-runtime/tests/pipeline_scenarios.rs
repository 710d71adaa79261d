//! End-to-end escalation scenarios for the multi-stage pipeline.

mod common;

use std::sync::Arc;

use evalgate_core::{
    Canonicalizer, CanonicalEvaluation, CostAccountant, EvaluationInput, FailureCode, Fixed,
    ScoreSource, Severity, Stage,
};
use evalgate_runtime::{MultiStageEvaluationPipeline, RuntimeConfig, ScoringBackend};
use serde_json::json;

use common::{refund_request, scores, FailingBackend, ScriptedBackend, OUTPUT_TOKENS, PROMPT_TOKENS};

const SMALL: &str = "gpt-4o-mini";
const LARGE: &str = "gpt-4o";

fn pipeline(
    small: Arc<dyn ScoringBackend>,
    large: Arc<dyn ScoringBackend>,
) -> MultiStageEvaluationPipeline {
    MultiStageEvaluationPipeline::builder(Arc::new(RuntimeConfig::default()))
        .costs(CostAccountant::builtin())
        .backend(SMALL, small)
        .backend(LARGE, large)
        .build()
        .unwrap()
}

fn canonical(input: EvaluationInput) -> CanonicalEvaluation {
    Canonicalizer::new(RuntimeConfig::default().canonical_defaults()).normalize(input)
}

fn judge_cost(model: &str) -> Fixed {
    CostAccountant::builtin().cost(model, PROMPT_TOKENS, OUTPUT_TOKENS)
}

#[tokio::test]
async fn test_empty_answer_fails_at_stage_one() {
    let small = ScriptedBackend::uniform(0.9);
    let large = ScriptedBackend::uniform(0.9);
    let pipeline = pipeline(small.clone(), large.clone());

    let result = pipeline
        .evaluate(&canonical(EvaluationInput {
            response: String::new(),
            ..refund_request()
        }))
        .await;

    assert_eq!(result.stage, Stage::Deterministic);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.total_cost, Fixed::ZERO);
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].code, FailureCode::EmptyAnswer);
    assert_eq!(result.issues[0].severity, Severity::P0);
    assert_eq!(small.calls() + large.calls(), 0);
}

#[tokio::test]
async fn test_missing_context_fails_at_stage_one() {
    let small = ScriptedBackend::uniform(0.9);
    let pipeline = pipeline(small.clone(), ScriptedBackend::uniform(0.9));

    let result = pipeline
        .evaluate(&canonical(EvaluationInput {
            context: Some(vec!["too short".to_string(), "   ".to_string()]),
            ..refund_request()
        }))
        .await;

    assert_eq!(result.stage, Stage::Deterministic);
    assert_eq!(result.total_cost, Fixed::ZERO);
    assert!(result
        .issues
        .iter()
        .any(|i| i.code == FailureCode::NoContext && i.severity == Severity::P0));
    assert_eq!(small.calls(), 0);
}

#[tokio::test]
async fn test_confident_small_judge_stops_escalation() {
    let small = ScriptedBackend::uniform(0.9);
    let large = ScriptedBackend::uniform(0.9);
    let pipeline = pipeline(small.clone(), large.clone());

    let result = pipeline.evaluate(&canonical(refund_request())).await;

    assert_eq!(result.stage, Stage::SmallModel);
    assert_eq!(result.confidence, 0.9);
    assert_eq!(small.calls(), 1);
    assert_eq!(large.calls(), 0);
    assert_eq!(result.total_cost, judge_cost(SMALL));

    let stage1_tokens = result.stages[0].tokens;
    assert_eq!(result.tokens_used, stage1_tokens + PROMPT_TOKENS + OUTPUT_TOKENS);
}

#[tokio::test]
async fn test_metric_disagreement_escalates_to_large_model() {
    let small = ScriptedBackend::new(scores(1.0, 0.1, 0.95, 0.1, 0.1));
    let large = ScriptedBackend::uniform(0.6);
    let pipeline = pipeline(small.clone(), large.clone());

    let result = pipeline.evaluate(&canonical(refund_request())).await;

    assert_eq!(result.stage, Stage::LargeModel);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(large.calls(), 1);
    assert_eq!(result.metrics.faithfulness, Some(0.6));
    assert_eq!(result.metrics.context_recall, Some(0.6));
    assert_eq!(result.total_cost, judge_cost(SMALL) + judge_cost(LARGE));

    let stages: Vec<Stage> = result.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![Stage::Deterministic, Stage::SmallModel, Stage::LargeModel]
    );
}

#[tokio::test]
async fn test_low_confidence_escalates_to_large_model() {
    // Variance just above 0.10: agreement is too weak to stop, but not a disagreement
    let small = ScriptedBackend::new(scores(0.95, 0.25, 0.9, 0.3, 0.1));
    let large = ScriptedBackend::uniform(0.8);
    let pipeline = pipeline(small, large.clone());

    let result = pipeline.evaluate(&canonical(refund_request())).await;

    assert_eq!(result.stage, Stage::LargeModel);
    assert_eq!(result.stages[1].confidence, 0.7);
    assert_eq!(large.calls(), 1);
}

#[tokio::test]
async fn test_judge_model_from_metadata_selects_stage_two_backend() {
    let default_small = ScriptedBackend::uniform(0.9);
    let haiku = ScriptedBackend::uniform(0.95);
    let pipeline = MultiStageEvaluationPipeline::builder(Arc::new(RuntimeConfig::default()))
        .costs(CostAccountant::builtin())
        .backend(SMALL, default_small.clone())
        .backend("claude-3-5-haiku", haiku.clone())
        .build()
        .unwrap();

    let input = EvaluationInput {
        metadata: [("judge_model".to_string(), json!("claude-3-5-haiku"))]
            .into_iter()
            .collect(),
        ..refund_request()
    };
    let result = pipeline.evaluate(&canonical(input)).await;

    assert_eq!(result.stage, Stage::SmallModel);
    assert_eq!(haiku.calls(), 1);
    assert_eq!(default_small.calls(), 0);
}

#[tokio::test]
async fn test_failing_backend_falls_back_to_synthetic_scores() {
    let pipeline = pipeline(Arc::new(FailingBackend), Arc::new(FailingBackend));

    let result = pipeline.evaluate(&canonical(refund_request())).await;

    assert!(result.stages.len() >= 2);
    assert!(result.stages[1..]
        .iter()
        .all(|s| s.source == ScoreSource::Synthetic));
    assert!(result.metrics.faithfulness.is_some());
    assert!(result.total_cost > Fixed::ZERO);
}

#[tokio::test]
async fn test_operational_metrics_come_from_stage_one() {
    let pipeline = pipeline(ScriptedBackend::uniform(0.9), ScriptedBackend::uniform(0.9));

    let result = pipeline
        .evaluate(&canonical(EvaluationInput {
            total_latency_ms: Some(2500),
            total_cost: Some("0.0031".parse().unwrap()),
            ..refund_request()
        }))
        .await;

    assert_eq!(result.stage, Stage::SmallModel);
    assert_eq!(result.metrics.response_latency_ms, Some(2500));
    assert_eq!(result.metrics.cost_per_query, Some("0.0031".parse().unwrap()));
    assert_eq!(result.metrics.total_tokens, Some(result.stages[0].tokens));
}
