//! Resilience patterns for judge backends.
//!
//! Retry with backoff lives next to the provider call in the LLM backend;
//! this module holds the per-model circuit breaker.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
