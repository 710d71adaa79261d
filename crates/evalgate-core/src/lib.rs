//! # evalgate-core
//!
//! Deterministic core of the cost-tiered RAG evaluation gate.
//!
//! This crate answers, for every (query, response, context) triple:
//! - Is the input even worth judging?
//! - Is the current verdict confident enough, or must it escalate?
//! - Does the result pass the project's quality gate, and if not, why?
//! - What pipeline change would most likely fix it?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No LLM calls**: Judges live in `evalgate-runtime`
//! 3. **Exact money**: Costs and thresholds are fixed-point, never `f64`
//! 4. **Stable identity**: Cache keys change only when the judged content
//!    or the judging configuration changes
//!
//! ## Example
//!
//! ```rust,ignore
//! use evalgate_core::{GatePolicy, GatePolicyEngine, MetricSet};
//!
//! let policy = GatePolicy::from_file("policy.yaml")?;
//! let metrics = MetricSet { faithfulness: Some(0.55), ..Default::default() };
//! let outcome = GatePolicyEngine::new().evaluate(&metrics, Some(&policy), &[]);
//!
//! println!("{} ({}): {:?}", outcome.decision, outcome.severity, outcome.failure_codes);
//! ```

pub mod autofix;
pub mod cache_key;
pub mod canonical;
pub mod checks;
pub mod cost;
pub mod fixed;
pub mod gate;
pub mod policy;
pub mod router;
pub mod tokens;
pub mod types;

// Re-export main types at crate root
pub use autofix::{AutoFixEngine, AutoFixRule, RuleError};
pub use cache_key::{derive_cache_key, CacheIdentity};
pub use canonical::{CanonicalDefaults, Canonicalizer, EvaluationInput, ProducerPayload};
pub use checks::{DeterministicChecker, DeterministicResult};
pub use cost::{CostAccountant, ModelRate, PriceTable, PricingError, StageCostEstimate};
pub use fixed::{Fixed, FixedParseError};
pub use gate::GatePolicyEngine;
pub use policy::{GatePolicy, PolicyError, SeverityCutoffs};
pub use router::{ConfidenceRouter, RoutingDecision, RoutingReason};
pub use tokens::{CountMethod, TokenAccountant, TokenCount, TokenizableMessage};
pub use types::{
    AutofixRecommendation, CanonicalEvaluation, ContextChunk, Decision, FailureCode, FixConfidence,
    FixType, Framework, GateOutcome, Issue, Metadata, MetricSet, PipelineResult, ScoreSource,
    Severity, Stage, StageRecord,
};
