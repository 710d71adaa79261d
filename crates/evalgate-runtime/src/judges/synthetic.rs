//! Synthetic scoring backend.
//!
//! Used when no provider serves the judge model, and as the fallback for
//! every judge failure. Scores are pseudo-random but seeded from the
//! judged content, so the same input always gets the same estimate.

use async_trait::async_trait;

use evalgate_core::{CanonicalEvaluation, CostAccountant, ScoreSource, TokenAccountant};

use super::backend::{JudgeError, JudgeOutcome, JudgeScores, ScoringBackend};
use crate::prompts;

const BASE_SCORE: f64 = 0.75;
const BASE_SPREAD: f64 = 0.15;
const METRIC_JITTER: f64 = 0.10;
const HALLUCINATION_MIN: f64 = 0.05;
const HALLUCINATION_MAX: f64 = 0.25;

/// Deterministic content-seeded score estimates.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    tokens: TokenAccountant,
    costs: CostAccountant,
    output_tokens: u64,
}

/// Uniform draws in [0, 1) from a BLAKE3 output stream.
struct Draws {
    words: [u64; 6],
    next: usize,
}

impl Draws {
    fn seeded(canonical: &CanonicalEvaluation, model: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [model, canonical.query.as_str(), canonical.response.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        for text in canonical.context_texts() {
            hasher.update(text.as_bytes());
            hasher.update(&[0]);
        }

        let mut bytes = [0u8; 48];
        hasher.finalize_xof().fill(&mut bytes);

        let mut words = [0u64; 6];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        Self { words, next: 0 }
    }

    fn unit(&mut self) -> f64 {
        let word = self.words[self.next % self.words.len()];
        self.next += 1;
        (word >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in [-spread, spread).
    fn symmetric(&mut self, spread: f64) -> f64 {
        (self.unit() * 2.0 - 1.0) * spread
    }
}

impl SyntheticBackend {
    pub fn new(costs: CostAccountant, output_tokens: u64) -> Self {
        Self {
            tokens: TokenAccountant::new(),
            costs,
            output_tokens,
        }
    }

    /// Estimate scores, tokens and cost for judging `canonical` with `model`.
    pub fn estimate(&self, canonical: &CanonicalEvaluation, model: &str) -> JudgeOutcome {
        let mut draws = Draws::seeded(canonical, model);
        let base = BASE_SCORE + draws.symmetric(BASE_SPREAD);

        let scores = JudgeScores {
            faithfulness: base + draws.symmetric(METRIC_JITTER),
            answer_relevancy: base + draws.symmetric(METRIC_JITTER),
            context_precision: base + draws.symmetric(METRIC_JITTER),
            context_recall: base + draws.symmetric(METRIC_JITTER),
            hallucination_score: HALLUCINATION_MIN
                + draws.unit() * (HALLUCINATION_MAX - HALLUCINATION_MIN),
        }
        .clamped();

        let prompt_tokens = self
            .tokens
            .count_messages(&prompts::judge_messages(canonical), model);

        JudgeOutcome {
            scores,
            tokens_used: prompt_tokens + self.output_tokens,
            cost: self.costs.cost(model, prompt_tokens, self.output_tokens),
            source: ScoreSource::Synthetic,
        }
    }
}

#[async_trait]
impl ScoringBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn score(
        &self,
        canonical: &CanonicalEvaluation,
        model: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        Ok(self.estimate(canonical, model))
    }
}
