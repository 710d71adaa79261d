use evalgate_core::{
    ConfidenceRouter, Decision, FailureCode, GatePolicy, GatePolicyEngine, Issue, MetricSet,
    Severity,
};
use proptest::prelude::*;

fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::P0),
        Just(Severity::P1),
        Just(Severity::P2),
        Just(Severity::P3),
    ]
}

fn arb_issue() -> impl Strategy<Value = Issue> {
    (
        prop_oneof![
            Just(FailureCode::EmptyAnswer),
            Just(FailureCode::NoContext),
            Just(FailureCode::TokenLimitExceeded),
        ],
        arb_severity(),
    )
        .prop_map(|(code, severity)| Issue::new(code, severity, "generated"))
}

fn arb_metrics() -> impl Strategy<Value = MetricSet> {
    (
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(0.0f64..=1.0),
        proptest::option::of(0u64..20_000),
    )
        .prop_map(|(f, r, p, c, h, latency)| MetricSet {
            faithfulness: f,
            answer_relevancy: r,
            context_precision: p,
            context_recall: c,
            hallucination_score: h,
            response_latency_ms: latency,
            ..Default::default()
        })
}

fn decision_rank(decision: Decision) -> u8 {
    match decision {
        Decision::Pass => 0,
        Decision::Warn => 1,
        Decision::Fail => 2,
    }
}

proptest! {
    #[test]
    fn severity_merge_never_downgrades(current in arb_severity(), observed in arb_severity()) {
        let merged = current.upgrade(observed);
        prop_assert!(merged >= current);
        prop_assert!(merged >= observed);
        prop_assert!(merged == current || merged == observed);
    }

    #[test]
    fn severity_merge_is_order_independent(severities in prop::collection::vec(arb_severity(), 0..12)) {
        let forward = severities.iter().fold(Severity::P3, |acc, s| acc.upgrade(*s));
        let backward = severities.iter().rev().fold(Severity::P3, |acc, s| acc.upgrade(*s));
        prop_assert_eq!(forward, backward);

        let most_severe = severities.iter().copied().max().unwrap_or(Severity::P3);
        prop_assert_eq!(forward, most_severe);
    }

    #[test]
    fn adding_an_issue_never_improves_the_verdict(
        metrics in arb_metrics(),
        issues in prop::collection::vec(arb_issue(), 0..4),
        extra in arb_issue(),
    ) {
        let engine = GatePolicyEngine::new();
        let policy = GatePolicy::default();

        let before = engine.evaluate(&metrics, Some(&policy), &issues);
        let mut more = issues.clone();
        more.push(extra);
        let after = engine.evaluate(&metrics, Some(&policy), &more);

        prop_assert!(after.severity >= before.severity);
        prop_assert!(decision_rank(after.decision) >= decision_rank(before.decision));
    }

    #[test]
    fn decision_agrees_with_severity(metrics in arb_metrics(), issues in prop::collection::vec(arb_issue(), 0..4)) {
        let outcome = GatePolicyEngine::new().evaluate(&metrics, Some(&GatePolicy::default()), &issues);
        match outcome.decision {
            Decision::Fail => prop_assert!(outcome.severity.is_blocking()),
            Decision::Warn => {
                prop_assert!(!outcome.severity.is_blocking());
                prop_assert!(!outcome.failure_codes.is_empty());
            }
            Decision::Pass => prop_assert!(outcome.failure_codes.is_empty()),
        }
    }

    #[test]
    fn confidence_is_deterministic_and_bounded(metrics in arb_metrics()) {
        let router = ConfidenceRouter::default();
        let first = router.calculate_confidence(&metrics);
        let second = router.calculate_confidence(&metrics.clone());
        prop_assert_eq!(first.to_bits(), second.to_bits());
        prop_assert!((0.5..=1.0).contains(&first));
    }
}
