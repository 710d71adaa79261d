//! Stage 1: deterministic checks.
//!
//! Free to run (no LLM calls). Catches defects that make any further
//! scoring pointless and seeds the metric set with token and latency data.

use crate::cost::CostAccountant;
use crate::fixed::Fixed;
use crate::tokens::TokenAccountant;
use crate::types::{CanonicalEvaluation, FailureCode, Issue, MetricSet, Severity};

/// Minimum trimmed length for a response or a context chunk to count.
pub const MIN_TEXT_CHARS: usize = 10;

/// Default combined token ceiling (query + context + response).
pub const DEFAULT_MAX_TOTAL_TOKENS: u64 = 128_000;

/// Confidence when any P0 issue is present.
pub const CONFIDENCE_DEFINITE_FAILURE: f64 = 1.0;

/// Confidence when only non-P0 issues are present.
pub const CONFIDENCE_WITH_ISSUES: f64 = 0.5;

/// Confidence when nothing was found. Below the default escalation
/// threshold, so clean inputs always get a judge.
pub const CONFIDENCE_CLEAN: f64 = 0.6;

/// Outcome of Stage 1.
#[derive(Debug, Clone, PartialEq)]
pub struct DeterministicResult {
    pub issues: Vec<Issue>,
    pub metrics: MetricSet,
    pub confidence: f64,
    /// Tokens counted across query, context and response
    pub tokens_counted: u64,
}

impl DeterministicResult {
    pub fn has_p0(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::P0)
    }

    pub fn has_p1(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::P1)
    }
}

/// Runs the Stage 1 rule set.
#[derive(Debug, Clone)]
pub struct DeterministicChecker {
    tokens: TokenAccountant,
    costs: CostAccountant,
    max_total_tokens: u64,
}

impl DeterministicChecker {
    pub fn new(costs: CostAccountant) -> Self {
        Self {
            tokens: TokenAccountant::new(),
            costs,
            max_total_tokens: DEFAULT_MAX_TOTAL_TOKENS,
        }
    }

    pub fn with_max_total_tokens(mut self, max_total_tokens: u64) -> Self {
        self.max_total_tokens = max_total_tokens;
        self
    }

    pub fn check(&self, canonical: &CanonicalEvaluation) -> DeterministicResult {
        let mut issues = Vec::new();

        if canonical.response.trim().chars().count() < MIN_TEXT_CHARS {
            issues.push(Issue::new(
                FailureCode::EmptyAnswer,
                Severity::P0,
                format!("Response is empty or too short (<{} chars)", MIN_TEXT_CHARS),
            ));
        }

        let usable_context = canonical
            .context_chunks
            .iter()
            .any(|c| c.text.trim().chars().count() >= MIN_TEXT_CHARS);
        if !usable_context {
            issues.push(Issue::new(
                FailureCode::NoContext,
                Severity::P0,
                "No valid context chunks provided",
            ));
        }

        let model = canonical
            .producer_model()
            .unwrap_or(canonical.judge_model.as_str());
        let prompt_tokens = self.tokens.count(&canonical.query, model)
            + canonical
                .context_texts()
                .map(|t| self.tokens.count(t, model))
                .sum::<u64>();
        let response_tokens = self.tokens.count(&canonical.response, model);
        let total_tokens = prompt_tokens + response_tokens;

        if total_tokens > self.max_total_tokens {
            issues.push(Issue::new(
                FailureCode::TokenLimitExceeded,
                Severity::P1,
                format!(
                    "Total tokens ({}) exceeds {} limit",
                    total_tokens, self.max_total_tokens
                ),
            ));
        }

        let metrics = MetricSet {
            response_latency_ms: Some(canonical.total_latency_ms.unwrap_or(0)),
            total_tokens: Some(total_tokens),
            cost_per_query: self.producer_cost(canonical, prompt_tokens, response_tokens),
            ..Default::default()
        };

        let confidence = if issues.iter().any(|i| i.severity == Severity::P0) {
            CONFIDENCE_DEFINITE_FAILURE
        } else if !issues.is_empty() {
            CONFIDENCE_WITH_ISSUES
        } else {
            CONFIDENCE_CLEAN
        };

        tracing::debug!(
            issues = issues.len(),
            total_tokens,
            confidence,
            "Deterministic checks complete"
        );

        DeterministicResult {
            issues,
            metrics,
            confidence,
            tokens_counted: total_tokens,
        }
    }

    /// Cost of answering the query, as reported or estimated from the
    /// producer's model. Never the judge's cost.
    fn producer_cost(
        &self,
        canonical: &CanonicalEvaluation,
        prompt_tokens: u64,
        response_tokens: u64,
    ) -> Option<Fixed> {
        if let Some(reported) = canonical.total_cost {
            return Some(reported);
        }
        canonical
            .producer_model()
            .map(|model| self.costs.cost(model, prompt_tokens, response_tokens))
    }
}

impl Default for DeterministicChecker {
    fn default() -> Self {
        Self::new(CostAccountant::builtin())
    }
}
