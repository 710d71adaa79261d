//! LLM-backed scoring.
//!
//! Sends the rubric and the case to a provider and parses a strict JSON
//! verdict. Anything that is not a well-formed verdict with every metric in
//! [0, 1] is an error; the judge decides what to do with it.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use evalgate_core::{CanonicalEvaluation, CostAccountant, ScoreSource};

use super::backend::{JudgeError, JudgeOutcome, JudgeScores, ScoringBackend};
use crate::config::RetryConfig;
use crate::prompts;
use crate::providers::{CompletionConfig, LlmProvider, ProviderError};
use crate::resilience::CircuitBreaker;

#[derive(Debug, Deserialize)]
struct Verdict {
    faithfulness: f64,
    answer_relevancy: f64,
    context_precision: f64,
    context_recall: f64,
    hallucination_score: f64,
}

/// Parse a verdict, rejecting missing fields and out-of-range values.
///
/// A single surrounding Markdown code fence is tolerated.
pub fn parse_verdict(content: &str) -> Result<JudgeScores, JudgeError> {
    let body = strip_fence(content.trim());
    let verdict: Verdict = serde_json::from_str(body)
        .map_err(|e| JudgeError::InvalidVerdict(format!("not a verdict object: {}", e)))?;

    let fields = [
        ("faithfulness", verdict.faithfulness),
        ("answer_relevancy", verdict.answer_relevancy),
        ("context_precision", verdict.context_precision),
        ("context_recall", verdict.context_recall),
        ("hallucination_score", verdict.hallucination_score),
    ];
    for (name, value) in fields {
        if !(0.0..=1.0).contains(&value) {
            return Err(JudgeError::InvalidVerdict(format!(
                "{} out of range: {}",
                name, value
            )));
        }
    }

    Ok(JudgeScores {
        faithfulness: verdict.faithfulness,
        answer_relevancy: verdict.answer_relevancy,
        context_precision: verdict.context_precision,
        context_recall: verdict.context_recall,
        hallucination_score: verdict.hallucination_score,
    })
}

fn strip_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Judge backend that calls an LLM provider.
pub struct LlmJudgeBackend {
    provider: Arc<dyn LlmProvider>,
    costs: CostAccountant,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    max_output_tokens: u32,
    request_timeout: Duration,
}

impl LlmJudgeBackend {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        costs: CostAccountant,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            provider,
            costs,
            breaker,
            retry: RetryConfig::default(),
            max_output_tokens: 500,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = u32::try_from(tokens).unwrap_or(u32::MAX);
        self
    }

    /// Timeout for each provider attempt.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn call(
        &self,
        canonical: &CanonicalEvaluation,
        model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        let messages = prompts::judge_messages(canonical);
        let config = CompletionConfig {
            model: model.to_string(),
            max_tokens: self.max_output_tokens,
            temperature: 0.0,
            timeout: self.request_timeout,
            prompt_caching: true,
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(self.retry.max_attempts.saturating_sub(1) as usize);

        let provider = &self.provider;
        let config = &config;
        let messages = &messages;
        let attempt = move || {
            let messages = messages.clone();
            async move {
                // Hangs surface as retryable timeouts
                match tokio::time::timeout(config.timeout, provider.complete(messages, config))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => Err(ProviderError::Timeout(config.timeout)),
                }
            }
        };

        let response = attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::info!(
                    judge_model = %model,
                    provider = %self.provider.name(),
                    error = %err,
                    delay = ?delay,
                    "Retrying judge call"
                );
            })
            .await?;

        let usage = response.usage;
        let tokens_used = usage.total();
        let cost = self
            .costs
            .cost(model, usage.prompt_tokens, usage.completion_tokens);

        let scores = parse_verdict(&response.content).map_err(|e| JudgeError::UnusableVerdict {
            reason: match e {
                JudgeError::InvalidVerdict(reason) => reason,
                other => other.to_string(),
            },
            tokens_used,
            cost,
        })?;

        Ok(JudgeOutcome {
            scores,
            tokens_used,
            cost,
            source: ScoreSource::Backend,
        })
    }
}

#[async_trait]
impl ScoringBackend for LlmJudgeBackend {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn score(
        &self,
        canonical: &CanonicalEvaluation,
        model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        if self.breaker.is_open(model) {
            return Err(JudgeError::CircuitOpen {
                model: model.to_string(),
            });
        }

        let result = self.call(canonical, model).await;
        match &result {
            Ok(_) => self.breaker.record_success(model),
            Err(_) => self.breaker.record_failure(model),
        }
        result
    }

    fn record_timeout(&self, model: &str) {
        self.breaker.record_failure(model);
    }
}
