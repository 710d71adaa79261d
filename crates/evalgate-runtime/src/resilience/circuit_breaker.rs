//! Circuit breaker to stop hammering a failing judge model.
//!
//! When calls to a model fail repeatedly, its circuit opens and the judge
//! goes straight to the synthetic estimate until the recovery window passes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::humantime_serde;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,

    /// Time an open circuit waits before letting a probe through
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Probe successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of one model's circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

/// Per-model circuit breaker, shared by every judge in the process.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `model` should skip the backend.
    ///
    /// An open circuit whose recovery window has elapsed moves to half-open
    /// and lets the call through.
    pub fn is_open(&self, model: &str) -> bool {
        let mut states = self.states.write();
        let recovered = match states.get(model) {
            Some(CircuitState::Open { opened_at }) => {
                opened_at.elapsed() >= self.config.recovery_timeout
            }
            _ => return false,
        };

        if recovered {
            states.insert(model.to_string(), CircuitState::HalfOpen { successes: 0 });
            tracing::info!(judge_model = %model, "Circuit half-open, probing backend");
        }
        !recovered
    }

    pub fn record_success(&self, model: &str) {
        let mut states = self.states.write();
        match states.get(model).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    states.insert(model.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(judge_model = %model, "Circuit closed after recovery");
                } else {
                    states.insert(model.to_string(), CircuitState::HalfOpen { successes });
                }
            }
            Some(CircuitState::Closed { failures }) if failures > 0 => {
                states.insert(model.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, model: &str) {
        let mut states = self.states.write();
        let failures = match states.get(model).cloned() {
            Some(CircuitState::Closed { failures }) => failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    model.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(judge_model = %model, "Circuit reopened after failed probe");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                model.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(judge_model = %model, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(model.to_string(), CircuitState::Closed { failures });
        }
    }

    pub fn state(&self, model: &str) -> CircuitState {
        self.states
            .read()
            .get(model)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Close every circuit.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
