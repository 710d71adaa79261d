//! Evaluation service.
//!
//! The request flow around the pipeline:
//! normalize → policy lookup → cache key → cache → pipeline → gate →
//! autofix → sink → cache set.
//!
//! Policy and cache failures are logged and treated as absent. Only the
//! sink can fail a request, and it is written before the cache so a cached
//! record has always been recorded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use evalgate_core::{
    derive_cache_key, AutoFixEngine, AutofixRecommendation, CacheIdentity, Canonicalizer,
    CostAccountant, EvaluationInput, Framework, GateOutcome, GatePolicy, GatePolicyEngine,
    PipelineResult, PolicyError,
};

use crate::cache::{MokaResultCache, ResultCache};
use crate::config::{ConfigError, RuntimeConfig};
use crate::judges::ScoringBackend;
use crate::pipeline::{MultiStageEvaluationPipeline, PipelineBuilder};
use crate::providers::ProviderSet;

/// Errors surfaced to the caller of [`EvaluationService`].
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to record evaluation: {0}")]
    Sink(#[from] SinkError),
}

/// Errors from an [`EvaluationSink`].
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Everything known about one finished evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub identity: CacheIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub framework: Framework,
    pub result: PipelineResult,
    pub gate: GateOutcome,
    pub recommendations: Vec<AutofixRecommendation>,
    pub policy_version: u32,
    pub pricing_version: String,
    pub evaluator_version: String,
    pub judge_model: String,
    /// True when served from the result cache
    pub cached: bool,
    pub evaluated_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Looks up the gate policy for a project.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// `Ok(None)` means no policy: threshold checks are skipped.
    async fn policy_for(&self, project_id: Option<&str>) -> Result<Option<GatePolicy>, PolicyError>;
}

/// Policies held in memory, per project with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    default: Option<GatePolicy>,
    projects: HashMap<String, GatePolicy>,
}

impl StaticPolicySource {
    /// No policies at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Policy applied when the project has none of its own.
    pub fn with_default(mut self, policy: GatePolicy) -> Self {
        self.default = Some(policy);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>, policy: GatePolicy) -> Self {
        self.projects.insert(project_id.into(), policy);
        self
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn policy_for(&self, project_id: Option<&str>) -> Result<Option<GatePolicy>, PolicyError> {
        let policy = project_id
            .and_then(|id| self.projects.get(id))
            .or(self.default.as_ref());
        Ok(policy.cloned())
    }
}

/// Destination for finished evaluation records.
#[async_trait]
pub trait EvaluationSink: Send + Sync {
    async fn record(&self, record: &EvaluationRecord) -> Result<(), SinkError>;
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EvaluationSink for NoopSink {
    async fn record(&self, _record: &EvaluationRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EvaluationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EvaluationRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl EvaluationSink for MemorySink {
    async fn record(&self, record: &EvaluationRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Evaluates requests end to end.
pub struct EvaluationService {
    config: Arc<RuntimeConfig>,
    canonicalizer: Canonicalizer,
    pipeline: MultiStageEvaluationPipeline,
    gate: GatePolicyEngine,
    autofix: AutoFixEngine,
    policies: Arc<dyn PolicySource>,
    cache: Arc<dyn ResultCache>,
    sink: Arc<dyn EvaluationSink>,
    pricing_version: String,
}

impl EvaluationService {
    pub fn builder(config: RuntimeConfig) -> EvaluationServiceBuilder {
        EvaluationServiceBuilder::new(config)
    }

    pub fn pipeline(&self) -> &MultiStageEvaluationPipeline {
        &self.pipeline
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Evaluate one request.
    pub async fn evaluate(&self, input: EvaluationInput) -> Result<EvaluationRecord, ServiceError> {
        let started = Instant::now();
        let mut canonical = self.canonicalizer.normalize(input);

        let policy = match self.policies.policy_for(canonical.project_id.as_deref()).await {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(
                    project_id = ?canonical.project_id,
                    error = %e,
                    "Policy lookup failed, evaluating without thresholds"
                );
                None
            }
        };
        canonical.policy_version = policy
            .as_ref()
            .map(|p| p.version)
            .unwrap_or(self.config.default_policy_version);

        let identity = derive_cache_key(
            &canonical.query,
            &canonical.context_chunks,
            &canonical.response,
            canonical.policy_version,
            &canonical.judge_model,
            &canonical.evaluator_version,
        );

        // Stored results are shared across projects; the gate, autofix and
        // operational metrics always follow the caller.
        let stored = match self.cache.get(&identity.cache_key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(cache_key = %identity.cache_key, error = %e, "Cache read failed");
                None
            }
        };

        let (result, evaluated_at, cached) = match stored {
            Some(stored) => {
                tracing::info!(cache_key = %identity.cache_key, "Cache hit");
                let result = self.pipeline.reuse(&canonical, stored.result);
                (result, stored.evaluated_at, true)
            }
            None => (self.pipeline.evaluate(&canonical).await, Utc::now(), false),
        };

        let gate = self
            .gate
            .evaluate(&result.metrics, policy.as_ref(), &result.issues);
        let recommendations = self.autofix.analyze(&canonical, &result.metrics);

        let record = EvaluationRecord {
            identity,
            project_id: canonical.project_id.clone(),
            framework: canonical.framework,
            result,
            gate,
            recommendations,
            policy_version: canonical.policy_version,
            pricing_version: self.pricing_version.clone(),
            evaluator_version: canonical.evaluator_version.clone(),
            judge_model: canonical.judge_model.clone(),
            cached,
            evaluated_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if cached {
            return Ok(record);
        }

        self.sink.record(&record).await?;

        if let Err(e) = self
            .cache
            .set(&record.identity.cache_key, &record, self.config.cache.ttl)
            .await
        {
            tracing::warn!(cache_key = %record.identity.cache_key, error = %e, "Cache write failed");
        }

        tracing::info!(
            cache_key = %record.identity.cache_key,
            stage = %record.result.stage,
            confidence = record.result.confidence,
            decision = %record.gate.decision,
            severity = %record.gate.severity,
            cost = %record.result.total_cost,
            "Evaluation complete"
        );

        Ok(record)
    }

    /// Evaluate many requests concurrently, bounded by `batch_concurrency`.
    ///
    /// Results come back in input order.
    pub async fn evaluate_batch(
        &self,
        inputs: Vec<EvaluationInput>,
    ) -> Vec<Result<EvaluationRecord, ServiceError>> {
        stream::iter(inputs)
            .map(|input| self.evaluate(input))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }
}

impl std::fmt::Debug for EvaluationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationService")
            .field("pipeline", &self.pipeline)
            .field("pricing_version", &self.pricing_version)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EvaluationService`].
pub struct EvaluationServiceBuilder {
    config: Arc<RuntimeConfig>,
    costs: Option<CostAccountant>,
    providers: ProviderSet,
    backends: Vec<(String, Arc<dyn ScoringBackend>)>,
    policies: Option<Arc<dyn PolicySource>>,
    cache: Option<Arc<dyn ResultCache>>,
    sink: Option<Arc<dyn EvaluationSink>>,
}

impl EvaluationServiceBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config: Arc::new(config),
            costs: None,
            providers: ProviderSet::new(),
            backends: Vec::new(),
            policies: None,
            cache: None,
            sink: None,
        }
    }

    pub fn costs(mut self, costs: CostAccountant) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    pub fn backend(mut self, model: impl Into<String>, backend: Arc<dyn ScoringBackend>) -> Self {
        self.backends.push((model.into(), backend));
        self
    }

    pub fn policies(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EvaluationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the service. Loads the configured price table unless an
    /// accountant was supplied.
    pub fn build(self) -> Result<EvaluationService, ConfigError> {
        let costs = match self.costs {
            Some(costs) => costs,
            None => self.config.cost_accountant()?,
        };
        let pricing_version = costs.pricing_version().to_string();

        let mut pipeline = PipelineBuilder::new(self.config.clone())
            .costs(costs)
            .providers(self.providers);
        for (model, backend) in self.backends {
            pipeline = pipeline.backend(model, backend);
        }
        let pipeline = pipeline.build()?;

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MokaResultCache::from_config(&self.config.cache)));

        Ok(EvaluationService {
            canonicalizer: Canonicalizer::new(self.config.canonical_defaults()),
            pipeline,
            gate: GatePolicyEngine::new(),
            autofix: AutoFixEngine::new(),
            policies: self
                .policies
                .unwrap_or_else(|| Arc::new(StaticPolicySource::empty())),
            cache,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            pricing_version,
            config: self.config,
        })
    }
}
