//! Token counting by model family.
//!
//! OpenAI-family models use the matching `tiktoken` encoding. Everything
//! else (Anthropic, unknown vendors, or a tokenizer that fails to load)
//! uses a `chars / 4` estimate, reported as [`CountMethod::Estimated`] so
//! callers can tell approximate billing from exact billing.

use std::sync::{Arc, OnceLock};
use tiktoken_rs::CoreBPE;

/// Per-message overhead for chat-formatted prompts.
pub const TOKENS_PER_MESSAGE: u64 = 4;

/// Reply-priming overhead added once per chat prompt.
pub const REPLY_PRIMING_TOKENS: u64 = 2;

/// How a count was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMethod {
    /// Exact count from the model's tokenizer
    Tokenizer(Encoding),
    /// `chars / 4` estimate
    Estimated,
}

/// BPE encodings we load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

/// Token count plus the method that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCount {
    pub tokens: u64,
    pub method: CountMethod,
}

impl TokenCount {
    pub fn is_estimated(&self) -> bool {
        self.method == CountMethod::Estimated
    }
}

/// Anything with countable chat fields.
pub trait TokenizableMessage {
    /// Text fields counted toward the prompt (role, content, name...).
    fn token_fields(&self) -> Vec<&str>;
}

impl TokenizableMessage for (&str, &str) {
    fn token_fields(&self) -> Vec<&str> {
        vec![self.0, self.1]
    }
}

static CL100K: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();
static O200K: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();

fn load(encoding: Encoding) -> Option<Arc<CoreBPE>> {
    let cell = match encoding {
        Encoding::Cl100kBase => &CL100K,
        Encoding::O200kBase => &O200K,
    };

    cell.get_or_init(|| {
        let loaded = match encoding {
            Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            Encoding::O200kBase => tiktoken_rs::o200k_base(),
        };
        match loaded {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::warn!(encoding = ?encoding, error = %e, "Tokenizer failed to load, using estimates");
                None
            }
        }
    })
    .clone()
}

/// Pick the tokenizer encoding for a model id, if it has one.
pub fn encoding_for_model(model: &str) -> Option<Encoding> {
    let model = model.trim().to_ascii_lowercase();

    let o200k_prefixes = ["gpt-4o", "gpt-4.1", "gpt-5", "o1", "o3", "o4", "chatgpt-4o"];
    if o200k_prefixes.iter().any(|p| model.starts_with(p)) {
        return Some(Encoding::O200kBase);
    }

    let cl100k_prefixes = ["gpt-4", "gpt-3.5", "text-embedding-"];
    if cl100k_prefixes.iter().any(|p| model.starts_with(p)) {
        return Some(Encoding::Cl100kBase);
    }

    None
}

/// `len / 4` rounded down, on characters rather than bytes.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Counts tokens for a model family.
///
/// Stateless; tokenizers are process-wide and loaded on first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenAccountant;

impl TokenAccountant {
    pub fn new() -> Self {
        Self
    }

    /// Token count for `text` under `model`.
    pub fn count(&self, text: &str, model: &str) -> u64 {
        self.count_detailed(text, model).tokens
    }

    /// Token count plus how it was obtained.
    pub fn count_detailed(&self, text: &str, model: &str) -> TokenCount {
        if let Some(encoding) = encoding_for_model(model) {
            if let Some(bpe) = load(encoding) {
                return TokenCount {
                    tokens: bpe.encode_ordinary(text).len() as u64,
                    method: CountMethod::Tokenizer(encoding),
                };
            }
        }

        tracing::debug!(model = %model, "No tokenizer for model, estimating tokens");
        TokenCount {
            tokens: estimate_tokens(text),
            method: CountMethod::Estimated,
        }
    }

    /// Token count for a chat prompt.
    ///
    /// Sum of per-field counts, plus 4 per message, plus 2 for reply priming.
    pub fn count_messages<M: TokenizableMessage>(&self, messages: &[M], model: &str) -> u64 {
        let content: u64 = messages
            .iter()
            .flat_map(|m| m.token_fields())
            .map(|field| self.count(field, model))
            .sum();

        content + TOKENS_PER_MESSAGE * messages.len() as u64 + REPLY_PRIMING_TOKENS
    }
}
