//! Convenience re-exports for common `straylight-rs` types.
//!
//! Meant to be glob-imported when wiring up an agent:
//!
//! ```ignore
//! use straylight_rs::prelude::*;
//! ```
//!
//! This pulls in the types needed for the vast majority of runs: the
//! gateway, the capability set with the SSH capabilities, the runner and
//! privesc agent, event handlers, and the run log. Specialized pieces
//! (trimming internals, raw store rows, retry policy) are intentionally
//! excluded — import those from their modules directly when needed.

// ── Core wire types ─────────────────────────────────────────────────
pub use crate::{Message, MessageRole, ToolDef, json_schema_for};

// ── Gateway ─────────────────────────────────────────────────────────
pub use crate::gateway::{GatewayConfig, LlmGateway, LlmReply, OpenAiGateway};

// ── Capabilities ────────────────────────────────────────────────────
pub use crate::capability::flag::SubmitFlag;
pub use crate::capability::note::RecordNote;
pub use crate::capability::ssh::{Exec, SshConnection, SshRunCommand, SshTestCredential};
pub use crate::capability::{
    Capability, CapabilityOutcome, CapabilitySet, ParamSpec, ParamValue, cmd_output_fixer,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CountTokens, SlidingCliHistory, TokenCounter};

// ── Run loop ────────────────────────────────────────────────────────
pub use crate::run::{
    Agent, EventHandler, LinuxPrivesc, LoggingHandler, NoopHandler, RunContext, RunError,
    RunEvent, RunVerdict, Runner,
};

// ── Persistence ─────────────────────────────────────────────────────
pub use crate::store::{RunId, RunLog};
