//! OpenAI-compatible chat-completion gateway.
//!
//! Speaks the `/chat/completions` dialect against any compatible endpoint
//! (OpenAI itself, a local llama.cpp server, a proxy). Rate limits get a
//! backoff-and-retry; transport errors get a bounded retry count; permanent
//! API errors surface immediately.

use super::retry::{RetryConfig, is_transient_status};
use super::{GatewayError, GatewayFuture, LlmGateway, LlmReply};
use crate::context::counter::{CountTokens, TokenCounter};
use crate::{ChatRequest, Message, UsageInfo};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ── Config ─────────────────────────────────────────────────────────

/// Explicit gateway configuration, constructed once at process start and
/// handed to [`OpenAiGateway::new`]. There is no ambient/global key or URL.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer token for the API.
    pub api_key: String,
    /// Base URL up to (not including) `/chat/completions`.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// The model's input context window, in tokens.
    pub context_size: usize,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Maximum tokens per completion (0 = let the server decide).
    pub max_tokens: u32,
    /// Sampling temperature (0.0 = omit from the request).
    pub temperature: f32,
    /// Retry policy for transport errors and rate limits.
    pub retry: RetryConfig,
}

impl GatewayConfig {
    /// Sensible defaults for a model/context pair against api.openai.com.
    pub fn for_model(model: impl Into<String>, context_size: usize) -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            context_size,
            timeout: Duration::from_secs(120),
            max_tokens: 0,
            temperature: 0.0,
            retry: RetryConfig::default(),
        }
    }
}

// ── Response parsing ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Gateway ────────────────────────────────────────────────────────

/// Async HTTP gateway for an OpenAI-compatible chat completions API.
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    counter: Arc<TokenCounter>,
}

impl OpenAiGateway {
    /// Build the HTTP client and resolve the model's tokenizer (falling back
    /// to the general-purpose encoding for unknown model names).
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.model.is_empty() {
            return Err(GatewayError::Config("model must not be empty".to_string()));
        }
        if config.context_size == 0 {
            return Err(GatewayError::Config(
                "context size must be greater than zero".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent("straylight/0.3")
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;

        let counter = Arc::new(TokenCounter::with_fallback(&config.model));
        Ok(Self {
            client,
            config,
            counter,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, prompt: &str) -> Result<(String, Option<UsageInfo>), SendError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            ..Default::default()
        };

        debug!(
            "LLM request: model={}, prompt={} chars, max_tokens={}",
            self.config.model,
            prompt.len(),
            self.config.max_tokens,
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SendError::Transport(format!("failed to read response: {e}")))?;

        debug!("LLM response: HTTP {} ({} bytes)", status, text.len());

        if status.as_u16() == 429 {
            return Err(SendError::RateLimited(format!("HTTP 429: {text}")));
        }
        if !status.is_success() {
            if is_transient_status(status.as_u16()) {
                return Err(SendError::Transport(format!("HTTP {status}: {text}")));
            }
            return Err(SendError::Permanent(format!("HTTP {status}: {text}")));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| SendError::Permanent(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(SendError::Permanent(format!("API error: {}", err.message)));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| SendError::Transport("empty response (no choices)".to_string()))?;

        Ok((content, parsed.usage))
    }
}

/// Internal per-attempt error classification.
enum SendError {
    RateLimited(String),
    Transport(String),
    Permanent(String),
}

impl LlmGateway for OpenAiGateway {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn context_size(&self) -> usize {
        self.config.context_size
    }

    fn counter(&self) -> Arc<dyn CountTokens + Send + Sync> {
        self.counter.clone()
    }

    fn get_response(&self, prompt: &str) -> GatewayFuture<'_> {
        let prompt = prompt.to_string();
        Box::pin(async move {
            let start = Instant::now();
            let mut transport_attempt: u32 = 0;
            let mut rate_limit_retried = false;

            let (content, usage) = loop {
                match self.send_once(&prompt).await {
                    Ok(ok) => break ok,
                    Err(SendError::RateLimited(msg)) => {
                        // One backoff-and-retry for rate limits; a second
                        // 429 escalates.
                        if rate_limit_retried {
                            return Err(GatewayError::RateLimited(msg));
                        }
                        rate_limit_retried = true;
                        let delay = self.config.retry.max_delay;
                        warn!("rate limited, backing off {:.1}s", delay.as_secs_f64());
                        tokio::time::sleep(delay).await;
                    }
                    Err(SendError::Transport(msg)) => {
                        if transport_attempt >= self.config.retry.max_retries {
                            return Err(GatewayError::Transport(msg));
                        }
                        let delay = self.config.retry.delay_for_attempt(transport_attempt);
                        warn!(
                            "transport error (attempt {}): {msg}; retrying in {:.1}s",
                            transport_attempt + 1,
                            delay.as_secs_f64(),
                        );
                        tokio::time::sleep(delay).await;
                        transport_attempt += 1;
                    }
                    Err(SendError::Permanent(msg)) => {
                        return Err(GatewayError::Api(msg));
                    }
                }
            };

            let duration = start.elapsed();

            // Prefer server-reported usage; fall back to local counting.
            let (tokens_query, tokens_response) = match usage {
                Some(u) => (
                    u.prompt_tokens.unwrap_or_else(|| self.counter.count(&prompt) as u32),
                    u.completion_tokens
                        .unwrap_or_else(|| self.counter.count(&content) as u32),
                ),
                None => (
                    self.counter.count(&prompt) as u32,
                    self.counter.count(&content) as u32,
                ),
            };

            debug!(
                "LLM reply: {} chars, {}/{} tokens, {:.1}s",
                content.len(),
                tokens_query,
                tokens_response,
                duration.as_secs_f64(),
            );

            Ok(LlmReply {
                result: content,
                prompt,
                duration,
                tokens_query,
                tokens_response,
            })
        })
    }
}
