//! Durable run persistence.
//!
//! Everything the loop does — prompts, answers, tool calls, section
//! markers, the final verdict — is appended to SQLite before the loop
//! proceeds. The log is the authoritative record of a run: a viewer (or a
//! post-mortem) reconstructs the full turn-by-turn transcript from it
//! alone, including which capability produced which result and how long
//! each step took.
//!
//! Writes commit before the loop moves on (autocommit + WAL), so a viewer
//! tailing the same database file sees every record as soon as the loop
//! depends on it being visible.

pub mod db;

// Re-export commonly used items at the module level.
pub use db::{MessageRow, QueryKind, RunId, RunLog, RunRow, StoreError, ToolCallRow};
