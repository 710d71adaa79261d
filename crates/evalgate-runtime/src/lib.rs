//! # evalgate-runtime
//!
//! Async, cost-tiered evaluation on top of `evalgate-core`.
//!
//! This crate runs the judge stages that `evalgate-core` deliberately
//! leaves out: the small-model and large-model quality judges, the
//! multi-stage pipeline that decides how far to escalate, and the service
//! that wraps it with caching, policy lookup and persistence.
//!
//! ## Important
//!
//! Verdicts never depend on a judge being reachable. Without a configured
//! provider (or when a call fails, times out, or its circuit is open) the
//! judge substitutes a deterministic synthetic estimate and says so in the
//! stage record.
//!
//! ## Example
//!
//! ```rust,ignore
//! use evalgate_runtime::{EvaluationService, RuntimeConfig};
//! use evalgate_core::EvaluationInput;
//!
//! let config = RuntimeConfig::load(Some("evalgate.yaml".as_ref()))?;
//! let service = EvaluationService::builder(config).build()?;
//!
//! let record = service.evaluate(EvaluationInput {
//!     query: "What is the refund window?".into(),
//!     response: "Thirty days from delivery.".into(),
//!     context: Some(vec!["Refunds are accepted within 30 days of delivery.".into()]),
//!     ..Default::default()
//! }).await?;
//!
//! println!("{} at {} for {}", record.gate.decision, record.result.stage, record.result.total_cost);
//! ```

pub mod cache;
pub mod config;
pub mod judges;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod service;

pub use cache::{CacheError, MokaResultCache, ResultCache};
pub use config::{CacheConfig, ConfigError, RetryConfig, RuntimeConfig, StageTimeouts};
pub use judges::{
    JudgeError, JudgeOutcome, JudgeScores, JudgeSet, LlmJudgeBackend, QualityJudge,
    ScoringBackend, SyntheticBackend,
};
pub use pipeline::{MultiStageEvaluationPipeline, PipelineBuilder};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry, ProviderSet};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use service::{
    EvaluationRecord, EvaluationService, EvaluationServiceBuilder, EvaluationSink, MemorySink,
    NoopSink, PolicySource, ServiceError, SinkError, StaticPolicySource,
};
