//! Autonomous LLM-driven penetration-testing agent.
//!
//! `straylight-rs` loops a bounded-context LLM against a live target (an SSH
//! host) to discover privilege-escalation paths or submit planted flags. The
//! core abstraction is the [`Runner`](run::runner::Runner) — a turn-based
//! loop that asks the LLM for the next action, dispatches it to a
//! [`Capability`](capability::core::Capability), records the outcome in a
//! sliding token-budgeted history, persists everything to SQLite, and repeats
//! until a capability signals that the goal was reached or the turn limit is
//! hit.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use straylight_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = OpenAiGateway::new(GatewayConfig {
//!         api_key: std::env::var("OPENAI_API_KEY")?,
//!         ..GatewayConfig::for_model("gpt-4-turbo", 8192)
//!     })?;
//!
//!     let conn = Arc::new(SshConnection::new("10.0.2.15", 22, "lowpriv", "trustno1"));
//!     let mut capabilities = CapabilitySet::new();
//!     capabilities.register(SshRunCommand::new(conn.clone()), None, true)?;
//!     capabilities.register(SshTestCredential::new(conn), None, false)?;
//!
//!     let log = RunLog::open("straylight.sqlite3")?;
//!     let agent = LinuxPrivesc::new(Arc::new(gateway), capabilities)
//!         .with_credentials("lowpriv", "trustno1");
//!
//!     let handler = LoggingHandler;
//!     let mut runner = Runner::new(agent, log)
//!         .with_max_turns(20)
//!         .with_event_handler(&handler);
//!     let verdict = runner.run("{}").await?;
//!
//!     println!("goal reached: {}", verdict.goal_reached);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`run`] | [`Runner`](run::runner::Runner) turn loop, run state machine, events, the Linux privesc agent |
//! | [`capability`] | [`Capability`](capability::core::Capability) trait, [`CapabilitySet`](capability::core::CapabilitySet) dispatch, SSH capabilities, output fixer |
//! | [`context`] | Token counting, front/back trimming, [`SlidingCliHistory`](context::history::SlidingCliHistory) |
//! | [`gateway`] | OpenAI-compatible chat gateway with retry and backoff |
//! | [`store`] | Durable SQLite run log: runs, messages, tool calls, sections |
//!
//! # Design principles
//!
//! 1. **Context is the scarcest resource.** Every prompt is assembled against
//!    an explicit token budget: context size minus a safety margin, the
//!    template cost, and any reserved state block. History is trimmed, never
//!    dropped wholesale.
//!
//! 2. **Capabilities are the unit of side effect.** Every action the LLM can
//!    take is a named capability with a declared parameter list and a uniform
//!    `(result text, goal reached)` outcome. The registry never retries a
//!    capability — retry policy lives inside the capability itself.
//!
//! 3. **The log is the run.** Every prompt, answer, and tool call is written
//!    to SQLite before the loop proceeds, so a concurrent viewer (or a
//!    post-mortem) can reconstruct the full transcript from the log alone.
//!
//! 4. **Fail loud, but record first.** Unexpected errors inside a turn mark
//!    the run as failed in the store and then propagate to the caller.
//!    Malformed LLM output is never fatal — it becomes a diagnostic result
//!    the model can read and self-correct from.

pub mod capability;
pub mod context;
pub mod gateway;
pub mod prelude;
pub mod run;
pub mod store;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the OpenAI function-calling API expects.
///
/// # Example
///
/// ```
/// use straylight_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct CredentialArgs {
///     username: String,
///     password: String,
/// }
///
/// let schema = json_schema_for::<CredentialArgs>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body for an OpenAI-compatible endpoint.
/// Unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in a conversation.
///
/// `Status` never goes over the wire — it labels operator-facing progress
/// messages in the run log (hints, section banners, verdicts).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    Status,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::Status => write!(f, "status"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Usage ──────────────────────────────────────────────────────────

/// Token usage statistics reported by the API.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
