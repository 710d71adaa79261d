//! Judge prompts.
//!
//! The rubric is a constant system prompt so providers with prompt caching
//! only pay for it once; the case (question, context, answer) goes in the
//! user turn.

use evalgate_core::CanonicalEvaluation;

use crate::providers::ChatMessage;

/// Rubric shared by every judge stage.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"
You are an evaluation judge for retrieval-augmented answers.

You score one answer against the question it responds to and the context
passages that were retrieved for it. You do not rewrite the answer and you
do not use knowledge outside the passages when judging support.

## Metrics (each a number from 0.0 to 1.0)
- faithfulness: share of the answer's claims that the context supports.
  1.0 = every claim is supported; 0.0 = nothing is supported.
- answer_relevancy: how directly the answer addresses the question.
- context_precision: share of the retrieved passages that are relevant to
  the question, weighted toward the top-ranked passages.
- context_recall: how much of the information needed for a complete answer
  is present in the passages. Use the reference answer when one is given.
- hallucination_score: share of the answer that contradicts the context or
  asserts facts absent from it. 0.0 = none; 1.0 = entirely unsupported.

## Output Format
Respond with a single JSON object and nothing else:
{
  "faithfulness": 0.0,
  "answer_relevancy": 0.0,
  "context_precision": 0.0,
  "context_recall": 0.0,
  "hallucination_score": 0.0,
  "reasoning": "one or two sentences"
}
"#;

/// Render the user turn for one evaluation.
pub fn render_case(canonical: &CanonicalEvaluation) -> String {
    let mut case = String::new();
    case.push_str("## Question\n");
    case.push_str(&canonical.query);
    case.push_str("\n\n## Retrieved Context\n");
    if canonical.context_chunks.is_empty() {
        case.push_str("(none)\n");
    }
    for (i, chunk) in canonical.context_chunks.iter().enumerate() {
        case.push_str(&format!("[{}] {}\n", i + 1, chunk.text));
    }
    case.push_str("\n## Answer\n");
    case.push_str(&canonical.response);
    if let Some(reference) = &canonical.ground_truth {
        case.push_str("\n\n## Reference Answer\n");
        case.push_str(reference);
    }
    case.push('\n');
    case
}

/// Full message list for a judge call.
pub fn judge_messages(canonical: &CanonicalEvaluation) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT.trim()),
        ChatMessage::user(render_case(canonical)),
    ]
}
