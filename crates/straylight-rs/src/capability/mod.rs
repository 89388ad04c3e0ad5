//! Capability abstractions for the agent loop.
//!
//! Every action the LLM can take against the target — running a shell
//! command, testing credentials, submitting a flag — is a [`Capability`]
//! trait implementor. Capabilities are collected into a [`CapabilitySet`]
//! which handles name resolution, free-text and function-calling dispatch,
//! and the uniform [`CapabilityOutcome`] result contract.
//!
//! # Submodules
//!
//! - [`core`] — [`Capability`] trait, [`CapabilitySet`], declarative
//!   [`ParamSpec`] parameter lists, text and structured dispatch.
//! - [`fixer`] — [`cmd_output_fixer`](fixer::cmd_output_fixer): unwraps the
//!   code fences, quotes, and shell-prompt prefixes LLMs love to wrap
//!   commands in.
//! - [`ssh`] — the [`Exec`](ssh::Exec) transport seam, the `ssh` subprocess
//!   implementation, and the `exec_command` / `test_credential` capabilities.
//! - [`flag`] — [`SubmitFlag`](flag::SubmitFlag) for CTF-style targets;
//!   signals the goal once every planted flag has been turned in.
//! - [`note`] — [`RecordNote`](note::RecordNote), a capability-internal
//!   scratchpad that never signals the goal.

pub mod core;
pub mod fixer;
pub mod flag;
pub mod note;
pub mod ssh;

// Re-export commonly used items at the module level.
pub use self::core::{
    Capability, CapabilityFuture, CapabilityOutcome, CapabilitySet, Dispatch, DispatchError,
    ParamKind, ParamSpec, ParamValue,
};
pub use self::fixer::cmd_output_fixer;
