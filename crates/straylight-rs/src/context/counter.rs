//! Model-aware token counting.
//!
//! Wraps a `tiktoken` BPE tokenizer resolved from a model identifier. Counts
//! are deterministic for a given model: the same text always yields the same
//! count, which the trimming layer relies on for convergence.

use std::fmt;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Anything that can count tokens in a string.
///
/// [`TokenCounter`] is the production implementation; tests substitute cheap
/// deterministic counters (e.g. whitespace word counts) through this trait.
pub trait CountTokens {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Errors from tokenizer resolution.
#[derive(Debug)]
pub enum TokenError {
    /// The model identifier has no known tokenizer mapping. Callers should
    /// fall back to a general-purpose tokenizer via
    /// [`TokenCounter::with_fallback`].
    UnknownModel(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::UnknownModel(model) => {
                write!(f, "no tokenizer mapping for model '{model}'")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// A token counter bound to one model's tokenizer.
pub struct TokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TokenCounter {
    /// Resolve the tokenizer for a model identifier.
    ///
    /// Fails with [`TokenError::UnknownModel`] if the identifier has no
    /// known mapping — use [`with_fallback`](Self::with_fallback) when a
    /// best-effort count is acceptable.
    pub fn for_model(model: &str) -> Result<Self, TokenError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|_| TokenError::UnknownModel(model.to_string()))?;
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    /// Resolve the tokenizer for a model, falling back to `cl100k_base`
    /// (the general-purpose encoding) for unknown identifiers.
    pub fn with_fallback(model: &str) -> Self {
        Self::for_model(model).unwrap_or_else(|_| {
            debug!("no tokenizer mapping for '{model}', falling back to cl100k_base");
            let bpe = tiktoken_rs::cl100k_base().expect("cl100k_base encoding is embedded");
            Self {
                model: model.to_string(),
                bpe,
            }
        })
    }

    /// The model identifier this counter was created for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Count the tokens in a text string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl CountTokens for TokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.count(text)
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .finish()
    }
}
