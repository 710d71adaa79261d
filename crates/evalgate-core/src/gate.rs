//! Gate policy engine.
//!
//! Turns a metric set, an optional policy and Stage 1 issues into a
//! pass/warn/fail decision with a severity and the failure codes behind
//! it. Thresholds are a static table evaluated in order; every
//! comparison happens in [`Fixed`].

use crate::fixed::Fixed;
use crate::policy::GatePolicy;
use crate::types::{Decision, FailureCode, GateOutcome, Issue, MetricSet, Severity};

/// Direction in which a metric breaches its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breach {
    /// Breached when the value is strictly below the limit
    Below,
    /// Breached when the value is strictly above the limit
    Above,
}

/// One row of the threshold table.
struct ThresholdCheck {
    code: FailureCode,
    observe: fn(&MetricSet) -> Option<Fixed>,
    limit: fn(&GatePolicy) -> Fixed,
    breach: Breach,
    severity: fn(Fixed, &GatePolicy) -> Severity,
}

impl ThresholdCheck {
    fn evaluate(&self, metrics: &MetricSet, policy: &GatePolicy) -> Option<Severity> {
        let value = (self.observe)(metrics)?;
        let limit = (self.limit)(policy);
        let breached = match self.breach {
            Breach::Below => value < limit,
            Breach::Above => value > limit,
        };
        breached.then(|| (self.severity)(value, policy))
    }
}

fn unit(value: Option<f64>) -> Option<Fixed> {
    value.and_then(Fixed::from_f64)
}

fn millis(value: u64) -> Fixed {
    Fixed::from_int(i64::try_from(value).unwrap_or(i64::MAX))
}

fn always_p2(_: Fixed, _: &GatePolicy) -> Severity {
    Severity::P2
}

static THRESHOLD_CHECKS: &[ThresholdCheck] = &[
    ThresholdCheck {
        code: FailureCode::LowFaithfulness,
        observe: |m| unit(m.faithfulness),
        limit: |p| p.min_faithfulness,
        breach: Breach::Below,
        severity: |v, p| {
            if v < p.severity_cutoffs.faithfulness_p1 {
                Severity::P1
            } else {
                Severity::P2
            }
        },
    },
    ThresholdCheck {
        code: FailureCode::LowRecall,
        observe: |m| unit(m.context_recall),
        limit: |p| p.min_context_recall,
        breach: Breach::Below,
        severity: always_p2,
    },
    ThresholdCheck {
        code: FailureCode::LowPrecision,
        observe: |m| unit(m.context_precision),
        limit: |p| p.min_context_precision,
        breach: Breach::Below,
        severity: always_p2,
    },
    ThresholdCheck {
        code: FailureCode::Hallucination,
        observe: |m| unit(m.hallucination_score),
        limit: |p| p.max_hallucination,
        breach: Breach::Above,
        severity: |v, p| {
            if v > p.severity_cutoffs.hallucination_p1 {
                Severity::P1
            } else {
                Severity::P2
            }
        },
    },
    ThresholdCheck {
        code: FailureCode::TooSlow,
        observe: |m| m.response_latency_ms.map(millis),
        limit: |p| millis(p.max_latency_ms),
        breach: Breach::Above,
        severity: always_p2,
    },
    ThresholdCheck {
        code: FailureCode::TooExpensive,
        observe: |m| m.cost_per_query,
        limit: |p| p.max_cost_per_query,
        breach: Breach::Above,
        severity: always_p2,
    },
];

/// Applies gate policies to evaluation metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatePolicyEngine;

impl GatePolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide pass/warn/fail.
    ///
    /// Stage 1 issues are absorbed first, then (with a policy) each
    /// threshold row in order. Missing metrics skip their row; no policy
    /// skips every row.
    pub fn evaluate(
        &self,
        metrics: &MetricSet,
        policy: Option<&GatePolicy>,
        issues: &[Issue],
    ) -> GateOutcome {
        let mut severity = Severity::P3;
        let mut failure_codes = Vec::new();

        for issue in issues {
            failure_codes.push(issue.code);
            severity = severity.upgrade(issue.severity);
        }

        if let Some(policy) = policy {
            for check in THRESHOLD_CHECKS {
                if let Some(observed) = check.evaluate(metrics, policy) {
                    failure_codes.push(check.code);
                    severity = severity.upgrade(observed);
                }
            }
        }

        let decision = if severity.is_blocking() {
            Decision::Fail
        } else if !failure_codes.is_empty() {
            Decision::Warn
        } else {
            Decision::Pass
        };

        GateOutcome {
            decision,
            severity,
            failure_codes,
        }
    }
}
