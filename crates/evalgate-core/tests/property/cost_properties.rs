use evalgate_core::{CostAccountant, Fixed};
use proptest::prelude::*;

const MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "claude-sonnet-4-20250514",
    "claude-3-5-haiku-20241022",
    "claude-haiku-4-20250131",
    "not-in-the-table",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn cost_is_exactly_additive(
        model_idx in 0..MODELS.len(),
        in_a in 0u64..2_000_000,
        out_a in 0u64..200_000,
        in_b in 0u64..2_000_000,
        out_b in 0u64..200_000,
    ) {
        let accountant = CostAccountant::builtin();
        let model = MODELS[model_idx];

        let split = accountant.cost(model, in_a, out_a) + accountant.cost(model, in_b, out_b);
        let whole = accountant.cost(model, in_a + in_b, out_a + out_b);
        prop_assert_eq!(split, whole);
    }

    #[test]
    fn stage_costs_sum_to_total(splits in prop::collection::vec((0u64..50_000, 0u64..2_000), 1..6)) {
        let accountant = CostAccountant::builtin();
        let total: Fixed = splits
            .iter()
            .map(|(i, o)| accountant.cost("gpt-4o-mini", *i, *o))
            .sum();
        let (ti, to) = splits.iter().fold((0, 0), |(a, b), (i, o)| (a + i, b + o));
        prop_assert_eq!(total, accountant.cost("gpt-4o-mini", ti, to));
    }

    #[test]
    fn cost_is_never_negative(model_idx in 0..MODELS.len(), i in 0u64..10_000_000, o in 0u64..10_000_000) {
        let accountant = CostAccountant::builtin();
        prop_assert!(accountant.cost(MODELS[model_idx], i, o) >= Fixed::ZERO);
    }

    #[test]
    fn decimal_text_parses_exactly(units in 0i64..1_000_000_000, micros in 0u32..1_000_000) {
        let text = format!("{}.{:06}", units, micros);
        let parsed: Fixed = text.parse().unwrap();
        let expected = Fixed::from_raw(units as i128 * 1_000_000_000_000 + micros as i128 * 1_000_000);
        prop_assert_eq!(parsed, expected);
    }
}
