//! The LLM boundary: prompt in, timed and token-counted reply out.
//!
//! The loop talks to models exclusively through the [`LlmGateway`] trait —
//! one rendered prompt string per call, one [`LlmReply`] back, carrying the
//! answer text, both token counts, and the wall-clock duration. Backends
//! differ (plain chat-completion REST, function calling), but the contract
//! is uniform, which is what lets the loop, history, and budget math stay
//! backend-agnostic.
//!
//! [`OpenAiGateway`](openai::OpenAiGateway) is the production
//! implementation: an OpenAI-compatible REST client with 429 backoff and a
//! bounded retry count for transport errors ([`retry`]). A gateway that
//! exhausts its retries returns an error, which the loop treats as fatal to
//! the run.

pub mod openai;
pub mod retry;

use crate::context::counter::CountTokens;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

// Re-export commonly used items at the module level.
pub use openai::{GatewayConfig, OpenAiGateway};
pub use retry::RetryConfig;

// ── Reply ──────────────────────────────────────────────────────────

/// One LLM round trip.
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// The model's answer text.
    pub result: String,
    /// The prompt that was sent (kept for logging/replay).
    pub prompt: String,
    /// Wall-clock duration of the call, including retries.
    pub duration: Duration,
    /// Prompt-side token count.
    pub tokens_query: u32,
    /// Completion-side token count.
    pub tokens_response: u32,
}

// ── Errors ─────────────────────────────────────────────────────────

/// Gateway failures. All of these mean retries (if any) were exhausted —
/// the loop does not retry on top.
#[derive(Debug)]
pub enum GatewayError {
    /// Rate limited and the backoff retry did not recover.
    RateLimited(String),
    /// Transport-level failure (connect, timeout, reset).
    Transport(String),
    /// The API answered with an error or an unusable body.
    Api(String),
    /// HTTP client construction failed (bad config).
    Config(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            GatewayError::Transport(msg) => write!(f, "transport error: {msg}"),
            GatewayError::Api(msg) => write!(f, "API error: {msg}"),
            GatewayError::Config(msg) => write!(f, "gateway configuration error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

// ── Trait ──────────────────────────────────────────────────────────

/// Boxed future returned by [`LlmGateway::get_response`].
pub type GatewayFuture<'a> = Pin<Box<dyn Future<Output = Result<LlmReply, GatewayError>> + Send + 'a>>;

/// A model behind a uniform prompt→reply contract.
pub trait LlmGateway: Send + Sync {
    /// The model identifier (for the run log).
    fn model(&self) -> &str;

    /// The model's input context window, in tokens.
    fn context_size(&self) -> usize;

    /// The token counter matching this model's tokenizer.
    fn counter(&self) -> Arc<dyn CountTokens + Send + Sync>;

    /// Send one prompt, get one reply.
    fn get_response(&self, prompt: &str) -> GatewayFuture<'_>;
}
