use evalgate_core::cache_key::{derive_cache_key, input_hash};
use evalgate_core::ContextChunk;
use proptest::prelude::*;

fn arb_chunk() -> impl Strategy<Value = ContextChunk> {
    (".{0,80}", proptest::option::of(1u32..50), proptest::option::of(0.0f64..=1.0)).prop_map(
        |(text, rank, score)| ContextChunk {
            rank,
            score,
            ..ContextChunk::new(text)
        },
    )
}

proptest! {
    #[test]
    fn same_inputs_same_key(
        query in ".{0,60}",
        response in ".{0,60}",
        chunks in prop::collection::vec(arb_chunk(), 0..5),
        policy_version in 1u32..100,
    ) {
        let a = derive_cache_key(&query, &chunks, &response, policy_version, "gpt-4o-mini", "3");
        let b = derive_cache_key(&query, &chunks.clone(), &response, policy_version, "gpt-4o-mini", "3");
        prop_assert_eq!(a, b);
    }

    #[test]
    fn namespace_inputs_do_not_touch_the_hash(
        query in ".{0,60}",
        response in ".{0,60}",
        chunks in prop::collection::vec(arb_chunk(), 0..5),
        v1 in 1u32..100,
        v2 in 1u32..100,
        judge in "[a-z0-9-]{1,20}",
    ) {
        prop_assume!(v1 != v2);
        let a = derive_cache_key(&query, &chunks, &response, v1, "gpt-4o-mini", "3");
        let b = derive_cache_key(&query, &chunks, &response, v2, &judge, "4");
        prop_assert_eq!(&a.input_hash, &b.input_hash);
        prop_assert_ne!(&a.namespace, &b.namespace);
        prop_assert_ne!(&a.cache_key, &b.cache_key);
    }

    #[test]
    fn swapping_distinct_chunks_changes_the_hash(
        first in arb_chunk(),
        second in arb_chunk(),
    ) {
        prop_assume!(first != second);
        let forward = input_hash("q", &[first.clone(), second.clone()], "r");
        let reversed = input_hash("q", &[second, first], "r");
        prop_assert_ne!(forward, reversed);
    }
}
