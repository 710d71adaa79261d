//! Content-addressed identity for evaluation results.
//!
//! The namespace carries everything that changes how an input is judged
//! (schema, evaluator version, policy version, judge model), so upgrading
//! any of them invalidates old results automatically. The input hash
//! covers only what makes two evaluations "the same": the query, the
//! response and the ordered context chunks. Metadata and timestamps are
//! excluded.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::types::ContextChunk;

/// Bumped when the hashed payload layout changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Cache identity of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIdentity {
    /// `namespace + ":" + input_hash`
    pub cache_key: String,
    /// Hex BLAKE3 digest of the evaluated content
    pub input_hash: String,
    pub namespace: String,
}

#[derive(Serialize)]
struct HashedChunk<'a> {
    text: &'a str,
    source_id: Option<&'a str>,
    rank: Option<u32>,
    score: Option<f64>,
}

#[derive(Serialize)]
struct HashedInput<'a> {
    query: &'a str,
    response: &'a str,
    context_chunks: Vec<HashedChunk<'a>>,
}

/// Composite namespace for a judging configuration.
///
/// `|` and `\` inside the free-form parts are backslash-escaped, so
/// distinct configurations never render to the same namespace.
pub fn cache_namespace(evaluator_version: &str, policy_version: u32, judge_model: &str) -> String {
    format!(
        "schema_v{}|eval_v{}|policy_{}|judge_{}",
        CACHE_SCHEMA_VERSION,
        escape_part(evaluator_version),
        policy_version,
        escape_part(judge_model)
    )
}

fn escape_part(part: &str) -> Cow<'_, str> {
    if !part.contains(['|', '\\']) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 2);
    for c in part.chars() {
        if c == '|' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Hex BLAKE3 digest over `{query, response, ordered chunks}`.
///
/// Field order is fixed by the struct layout, so the serialization is
/// stable across runs.
pub fn input_hash(query: &str, chunks: &[ContextChunk], response: &str) -> String {
    let payload = HashedInput {
        query,
        response,
        context_chunks: chunks
            .iter()
            .map(|c| HashedChunk {
                text: &c.text,
                source_id: c.source_id.as_deref(),
                rank: c.rank,
                score: c.score,
            })
            .collect(),
    };

    let mut hasher = blake3::Hasher::new();
    // Writing into the hasher cannot fail; serde_json only errors on
    // non-string map keys, which this payload does not have.
    if let Err(e) = serde_json::to_writer(&mut hasher, &payload) {
        tracing::error!(error = %e, "Cache payload serialization failed");
    }
    hasher.finalize().to_hex().to_string()
}

/// Derive the cache identity for an evaluation.
pub fn derive_cache_key(
    query: &str,
    chunks: &[ContextChunk],
    response: &str,
    policy_version: u32,
    judge_model: &str,
    evaluator_version: &str,
) -> CacheIdentity {
    let namespace = cache_namespace(evaluator_version, policy_version, judge_model);
    let input_hash = input_hash(query, chunks, response);

    CacheIdentity {
        cache_key: format!("{}:{}", namespace, input_hash),
        input_hash,
        namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunks() -> Vec<ContextChunk> {
        vec![
            ContextChunk::new("Refunds within 30 days.").with_rank(1).with_score(0.91),
            ContextChunk::new("Store credit after 30 days.").with_rank(2).with_score(0.72),
        ]
    }

    #[test]
    fn test_identical_inputs_yield_identical_keys() {
        let a = derive_cache_key("q", &chunks(), "r", 1, "gpt-4o-mini", "3");
        let b = derive_cache_key("q", &chunks(), "r", 1, "gpt-4o-mini", "3");
        assert_eq!(a, b);
        assert_eq!(a.cache_key, format!("{}:{}", a.namespace, a.input_hash));
        assert_eq!(a.input_hash.len(), 64);
    }

    #[test]
    fn test_namespace_format() {
        assert_eq!(
            cache_namespace("3", 2, "gpt-4o-mini"),
            "schema_v1|eval_v3|policy_2|judge_gpt-4o-mini"
        );
    }

    #[test]
    fn test_namespace_parts_cannot_collide() {
        // Both render to "eval_v3|policy_1|judge_a|policy_2|judge_b" unescaped
        let a = cache_namespace("3|policy_1|judge_a", 2, "b");
        let b = cache_namespace("3", 1, "a|policy_2|judge_b");
        assert_ne!(a, b);
        assert_eq!(a, "schema_v1|eval_v3\\|policy_1\\|judge_a|policy_2|judge_b");

        assert_ne!(
            cache_namespace("3", 1, "a\\|b"),
            cache_namespace("3", 1, "a|b")
        );
    }

    #[test]
    fn test_namespace_changes_leave_hash_alone() {
        let base = derive_cache_key("q", &chunks(), "r", 1, "gpt-4o-mini", "3");
        let variants = [
            derive_cache_key("q", &chunks(), "r", 2, "gpt-4o-mini", "3"),
            derive_cache_key("q", &chunks(), "r", 1, "gpt-4o", "3"),
            derive_cache_key("q", &chunks(), "r", 1, "gpt-4o-mini", "4"),
        ];
        for variant in variants {
            assert_ne!(variant.namespace, base.namespace);
            assert_ne!(variant.cache_key, base.cache_key);
            assert_eq!(variant.input_hash, base.input_hash);
        }
    }

    #[test]
    fn test_chunk_order_changes_hash() {
        let mut reversed = chunks();
        reversed.reverse();
        assert_ne!(input_hash("q", &chunks(), "r"), input_hash("q", &reversed, "r"));
    }

    #[test]
    fn test_chunk_metadata_is_excluded() {
        let mut tagged = chunks();
        tagged[0].metadata.insert("retrieved_at".into(), json!("2025-01-01T00:00:00Z"));
        assert_eq!(input_hash("q", &chunks(), "r"), input_hash("q", &tagged, "r"));
    }

    #[test]
    fn test_query_and_response_are_not_interchangeable() {
        assert_ne!(input_hash("a", &[], "b"), input_hash("b", &[], "a"));
    }
}
