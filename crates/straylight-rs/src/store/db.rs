//! SQLite-backed run log.
//!
//! Schema (append-only from the loop's point of view):
//!
//! - `runs` — one row per run: model, context size, state, tag, timestamps,
//!   serialized configuration. `state` is `in progress` until the run is
//!   finalized exactly once as `success` or a failure reason.
//! - `messages` — every prompt/answer/status line, with a per-run monotonic
//!   `message_id`, conversation label, role, token counts, and duration.
//! - `tool_calls` — capability invocations, keyed to the assistant message
//!   that requested them.
//! - `sections` — named message-id ranges (`round 1`, …) for the viewer.
//! - `message_stream_parts` — incremental content for streaming backends,
//!   appended under one message id and cleared when the message finalizes.
//! - `commands` / `queries` — the legacy flat shape (one row per LLM query
//!   with prompt and answer inline), kept for older analysis tooling.

use crate::MessageRole;
use chrono::Utc;
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub type RunId = i64;

// ── Errors ─────────────────────────────────────────────────────────

/// Persistence failures. All of them abort the run — a turn that cannot be
/// logged must not count.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// Finalize was called on a run that already left the `in progress` state.
    AlreadyFinalized(RunId),
    UnknownRun(RunId),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "database error: {e}"),
            StoreError::AlreadyFinalized(id) => write!(f, "run {id} is already finalized"),
            StoreError::UnknownRun(id) => write!(f, "run {id} does not exist"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

// ── Row types (read side) ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: RunId,
    pub model: String,
    pub context_size: i64,
    pub state: String,
    pub tag: String,
    pub started_at: String,
    pub stopped_at: Option<String>,
    pub configuration: String,
    pub rounds: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub message_id: i64,
    pub conversation: Option<String>,
    pub role: String,
    pub content: String,
    pub tokens_query: i64,
    pub tokens_response: i64,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct ToolCallRow {
    pub message_id: i64,
    pub tool_call_id: i64,
    pub function_name: String,
    pub arguments: String,
    pub result_text: String,
    pub duration: f64,
}

/// Which LLM call a legacy `queries` row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    NextCommand,
    AnalyzeResponse,
    UpdateState,
}

// ── RunLog ─────────────────────────────────────────────────────────

/// Append-oriented run log over one SQLite connection.
///
/// Message and tool-call ids are unique within a run and monotonically
/// assigned by this handle. The connection runs in autocommit mode with WAL
/// journaling: every append is durable and visible to concurrent readers
/// before the method returns.
pub struct RunLog {
    conn: Connection,
    message_seq: HashMap<RunId, i64>,
    tool_call_seq: HashMap<RunId, i64>,
    query_cmd_id: i64,
    analyze_response_id: i64,
    state_update_id: i64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    model TEXT,
    context_size INTEGER,
    state TEXT,
    tag TEXT,
    started_at TEXT,
    stopped_at TEXT,
    configuration TEXT,
    rounds INTEGER DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sections (
    section_id INTEGER PRIMARY KEY,
    run_id INTEGER,
    name TEXT,
    from_message INTEGER,
    to_message INTEGER,
    duration REAL
);
CREATE TABLE IF NOT EXISTS messages (
    run_id INTEGER,
    conversation TEXT,
    message_id INTEGER,
    role TEXT,
    content TEXT,
    duration REAL,
    tokens_query INTEGER,
    tokens_response INTEGER,
    PRIMARY KEY (run_id, message_id)
);
CREATE TABLE IF NOT EXISTS tool_calls (
    run_id INTEGER,
    message_id INTEGER,
    tool_call_id INTEGER,
    function_name TEXT,
    arguments TEXT,
    result_text TEXT,
    duration REAL,
    PRIMARY KEY (run_id, message_id, tool_call_id)
);
CREATE TABLE IF NOT EXISTS message_stream_parts (
    part_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER,
    message_id INTEGER,
    action TEXT,
    content TEXT
);
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY,
    name TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS queries (
    run_id INTEGER,
    round INTEGER,
    cmd_id INTEGER,
    query TEXT,
    response TEXT,
    duration REAL,
    tokens_query INTEGER,
    tokens_response INTEGER,
    prompt TEXT,
    answer TEXT
);
";

impl RunLog {
    /// Open (or create) a run log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory run log (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL lets a live viewer read while the loop writes; busy_timeout
        // retries on lock contention instead of failing outright.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        let mut log = Self {
            conn,
            message_seq: HashMap::new(),
            tool_call_seq: HashMap::new(),
            query_cmd_id: 0,
            analyze_response_id: 0,
            state_update_id: 0,
        };
        log.query_cmd_id = log.insert_or_select_cmd("query_cmd")?;
        log.analyze_response_id = log.insert_or_select_cmd("analyze_response")?;
        log.state_update_id = log.insert_or_select_cmd("update_state")?;
        Ok(log)
    }

    fn insert_or_select_cmd(&mut self, name: &str) -> Result<i64, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM commands WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO commands (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Run lifecycle ──────────────────────────────────────────────

    /// Create a new run in the `in progress` state. Returns its id.
    pub fn create_run(
        &mut self,
        model: &str,
        context_size: usize,
        tag: &str,
        configuration: &str,
    ) -> Result<RunId, StoreError> {
        self.conn.execute(
            "INSERT INTO runs (model, context_size, state, tag, started_at, configuration)
             VALUES (?1, ?2, 'in progress', ?3, ?4, ?5)",
            params![
                model,
                context_size as i64,
                tag,
                Utc::now().to_rfc3339(),
                configuration
            ],
        )?;
        let run_id = self.conn.last_insert_rowid();
        debug!("created run {run_id} (model: {model}, tag: {tag})");
        Ok(run_id)
    }

    /// Finalize a run as successful. Errors if the run was already finalized.
    pub fn run_was_success(&mut self, run_id: RunId, rounds: u32) -> Result<(), StoreError> {
        self.finalize(run_id, "success", rounds)
    }

    /// Finalize a run as failed, with the reason recorded as its state.
    pub fn run_was_failure(
        &mut self,
        run_id: RunId,
        reason: &str,
        rounds: u32,
    ) -> Result<(), StoreError> {
        self.finalize(run_id, reason, rounds)
    }

    fn finalize(&mut self, run_id: RunId, state: &str, rounds: u32) -> Result<(), StoreError> {
        let affected = self.conn.execute(
            "UPDATE runs SET state = ?1, stopped_at = ?2, rounds = ?3 \
             WHERE id = ?4 AND state = 'in progress'",
            params![state, Utc::now().to_rfc3339(), rounds, run_id],
        )?;
        if affected == 1 {
            return Ok(());
        }
        match self.get_run(run_id)? {
            Some(_) => Err(StoreError::AlreadyFinalized(run_id)),
            None => Err(StoreError::UnknownRun(run_id)),
        }
    }

    // ── Messages ───────────────────────────────────────────────────

    /// The message id the next [`add_message`](Self::add_message) will get.
    pub fn peek_next_message_id(&mut self, run_id: RunId) -> Result<i64, StoreError> {
        if let Some(next) = self.message_seq.get(&run_id) {
            return Ok(*next);
        }
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(message_id), -1) + 1 FROM messages WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        self.message_seq.insert(run_id, next);
        Ok(next)
    }

    /// Append a message; returns its per-run monotonic id.
    pub fn add_message(
        &mut self,
        run_id: RunId,
        conversation: Option<&str>,
        role: &MessageRole,
        content: &str,
        tokens_query: u32,
        tokens_response: u32,
        duration: Duration,
    ) -> Result<i64, StoreError> {
        let message_id = self.peek_next_message_id(run_id)?;
        self.conn.execute(
            "INSERT INTO messages
             (run_id, conversation, message_id, role, content, duration, tokens_query, tokens_response)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                conversation,
                message_id,
                role.to_string(),
                content,
                duration.as_secs_f64(),
                tokens_query as i64,
                tokens_response as i64,
            ],
        )?;
        self.message_seq.insert(run_id, message_id + 1);
        Ok(message_id)
    }

    /// Append an incremental content part under a (streaming) message id.
    pub fn add_stream_part(
        &mut self,
        run_id: RunId,
        message_id: i64,
        action: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO message_stream_parts (run_id, message_id, action, content)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, message_id, action, content],
        )?;
        Ok(())
    }

    /// Drop the stream parts of a message once it has been finalized.
    pub fn clear_stream_parts(&mut self, run_id: RunId, message_id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM message_stream_parts WHERE run_id = ?1 AND message_id = ?2",
            params![run_id, message_id],
        )?;
        Ok(())
    }

    // ── Tool calls ─────────────────────────────────────────────────

    /// Append a capability invocation, keyed to the requesting message.
    /// Returns the per-run monotonic tool-call id.
    pub fn add_tool_call(
        &mut self,
        run_id: RunId,
        message_id: i64,
        function_name: &str,
        arguments: &str,
        result_text: &str,
        duration: Duration,
    ) -> Result<i64, StoreError> {
        let seq = self.tool_call_seq.entry(run_id).or_insert(0);
        let tool_call_id = *seq;
        self.conn.execute(
            "INSERT INTO tool_calls
             (run_id, message_id, tool_call_id, function_name, arguments, result_text, duration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                message_id,
                tool_call_id,
                function_name,
                arguments,
                result_text,
                duration.as_secs_f64(),
            ],
        )?;
        *seq += 1;
        Ok(tool_call_id)
    }

    // ── Sections ───────────────────────────────────────────────────

    /// Record a named message-id range (e.g. `round 3`).
    pub fn add_section(
        &mut self,
        run_id: RunId,
        name: &str,
        from_message: i64,
        to_message: i64,
        duration: Duration,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO sections (run_id, name, from_message, to_message, duration)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, name, from_message, to_message, duration.as_secs_f64()],
        )?;
        Ok(())
    }

    // ── Legacy flat log ────────────────────────────────────────────

    /// Append a row to the legacy `queries` table. `query`/`response` carry
    /// the command and its result; `prompt`/`answer` carry the raw LLM
    /// round trip that produced them.
    #[allow(clippy::too_many_arguments)]
    pub fn add_log_query(
        &mut self,
        run_id: RunId,
        round: u32,
        kind: QueryKind,
        query: &str,
        response: &str,
        duration: Duration,
        tokens_query: u32,
        tokens_response: u32,
        prompt: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let cmd_id = match kind {
            QueryKind::NextCommand => self.query_cmd_id,
            QueryKind::AnalyzeResponse => self.analyze_response_id,
            QueryKind::UpdateState => self.state_update_id,
        };
        self.conn.execute(
            "INSERT INTO queries
             (run_id, round, cmd_id, query, response, duration, tokens_query, tokens_response, prompt, answer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run_id,
                round,
                cmd_id,
                query,
                response,
                duration.as_secs_f64(),
                tokens_query as i64,
                tokens_response as i64,
                prompt,
                answer,
            ],
        )?;
        Ok(())
    }

    // ── Read side (replay / viewer) ────────────────────────────────

    pub fn get_run(&self, run_id: RunId) -> Result<Option<RunRow>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, model, context_size, state, tag, started_at, stopped_at, \
                 configuration, rounds
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        model: row.get(1)?,
                        context_size: row.get(2)?,
                        state: row.get(3)?,
                        tag: row.get(4)?,
                        started_at: row.get(5)?,
                        stopped_at: row.get(6)?,
                        configuration: row.get(7)?,
                        rounds: row.get(8)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })
    }

    /// All messages of a run, in id order.
    pub fn get_messages(&self, run_id: RunId) -> Result<Vec<MessageRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, conversation, role, content, tokens_query, tokens_response, duration
             FROM messages WHERE run_id = ?1 ORDER BY message_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(MessageRow {
                    message_id: row.get(0)?,
                    conversation: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    tokens_query: row.get(4)?,
                    tokens_response: row.get(5)?,
                    duration: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All tool calls of a run, in id order.
    pub fn get_tool_calls(&self, run_id: RunId) -> Result<Vec<ToolCallRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, tool_call_id, function_name, arguments, result_text, duration
             FROM tool_calls WHERE run_id = ?1 ORDER BY tool_call_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(ToolCallRow {
                    message_id: row.get(0)?,
                    tool_call_id: row.get(1)?,
                    function_name: row.get(2)?,
                    arguments: row.get(3)?,
                    result_text: row.get(4)?,
                    duration: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(command, result)` pairs from the legacy log, in round order.
    pub fn get_cmd_history(&self, run_id: RunId) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT query, response FROM queries
             WHERE run_id = ?1 AND cmd_id = ?2 ORDER BY round ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id, self.query_cmd_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl fmt::Debug for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLog").finish_non_exhaustive()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> RunLog {
        RunLog::open_in_memory().unwrap()
    }

    fn zero() -> Duration {
        Duration::from_secs(0)
    }

    #[test]
    fn create_run_starts_in_progress() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        let run = log.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.state, "in progress");
        assert_eq!(run.model, "gpt-4");
        assert_eq!(run.context_size, 8192);
        assert!(run.stopped_at.is_none());
    }

    #[test]
    fn success_finalization_sets_state_and_stopped_at() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.run_was_success(run_id, 3).unwrap();
        let run = log.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.state, "success");
        assert_eq!(run.rounds, 3);
        assert!(run.stopped_at.is_some());
    }

    #[test]
    fn failure_records_reason_as_state() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.run_was_failure(run_id, "maximum turn number reached", 10)
            .unwrap();
        let run = log.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.state, "maximum turn number reached");
        assert_eq!(run.rounds, 10);
        assert!(run.stopped_at.is_some());
    }

    #[test]
    fn finalize_is_exactly_once() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.run_was_success(run_id, 1).unwrap();
        let err = log.run_was_failure(run_id, "late", 1).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyFinalized(_)));
    }

    #[test]
    fn finalize_unknown_run_errors() {
        let mut log = log();
        let err = log.run_was_success(999, 0).unwrap_err();
        assert!(matches!(err, StoreError::UnknownRun(999)));
    }

    #[test]
    fn message_ids_are_monotonic_per_run() {
        let mut log = log();
        let a = log.create_run("gpt-4", 8192, "a", "{}").unwrap();
        let b = log.create_run("gpt-4", 8192, "b", "{}").unwrap();

        let m0 = log
            .add_message(a, Some("main"), &MessageRole::User, "p1", 10, 0, zero())
            .unwrap();
        let m1 = log
            .add_message(a, Some("main"), &MessageRole::Assistant, "a1", 0, 5, zero())
            .unwrap();
        let other = log
            .add_message(b, None, &MessageRole::User, "p1", 1, 0, zero())
            .unwrap();

        assert_eq!(m0, 0);
        assert_eq!(m1, 1);
        assert_eq!(other, 0, "ids are scoped per run");
    }

    #[test]
    fn messages_replay_in_order_with_metadata() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.add_message(
            run_id,
            Some("main"),
            &MessageRole::User,
            "what next?",
            42,
            0,
            Duration::from_millis(500),
        )
        .unwrap();
        log.add_message(
            run_id,
            Some("main"),
            &MessageRole::Assistant,
            "sudo -l",
            42,
            3,
            Duration::from_millis(1500),
        )
        .unwrap();
        log.add_message(
            run_id,
            Some("analysis"),
            &MessageRole::Assistant,
            "the user can run sudo",
            10,
            6,
            zero(),
        )
        .unwrap();

        let messages = log.get_messages(run_id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].content, "sudo -l");
        assert_eq!(messages[1].tokens_response, 3);
        assert!(messages[1].duration > 1.0);
        assert_eq!(messages[2].conversation.as_deref(), Some("analysis"));
    }

    #[test]
    fn tool_calls_link_to_messages_in_order() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        let msg = log
            .add_message(run_id, Some("main"), &MessageRole::Assistant, "id", 0, 1, zero())
            .unwrap();

        let t0 = log
            .add_tool_call(run_id, msg, "exec_command", "id", "uid=1001", zero())
            .unwrap();
        let t1 = log
            .add_tool_call(run_id, msg, "exec_command", "sudo -l", "denied", zero())
            .unwrap();
        assert_eq!((t0, t1), (0, 1));

        let calls = log.get_tool_calls(run_id).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].message_id, msg);
        assert_eq!(calls[1].arguments, "sudo -l");
    }

    #[test]
    fn sections_record_message_ranges() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.add_section(run_id, "round 1", 0, 3, Duration::from_secs(2))
            .unwrap();
        // Read back directly — sections are viewer-facing.
        let count: i64 = log
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sections WHERE run_id = ?1 AND name = 'round 1'",
                params![run_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stream_parts_append_and_clear() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.add_stream_part(run_id, 5, "append", "sudo").unwrap();
        log.add_stream_part(run_id, 5, "append", " -l").unwrap();

        let count: i64 = log
            .conn
            .query_row(
                "SELECT COUNT(*) FROM message_stream_parts WHERE run_id = ?1 AND message_id = 5",
                params![run_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);

        log.clear_stream_parts(run_id, 5).unwrap();
        let count: i64 = log
            .conn
            .query_row(
                "SELECT COUNT(*) FROM message_stream_parts WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn legacy_queries_and_cmd_history() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        log.add_log_query(
            run_id,
            1,
            QueryKind::NextCommand,
            "id",
            "uid=1001",
            zero(),
            5,
            2,
            "what should I try next?",
            "id",
        )
        .unwrap();
        log.add_log_query(
            run_id,
            1,
            QueryKind::AnalyzeResponse,
            "id",
            "low privilege user",
            zero(),
            5,
            2,
            "analyze this",
            "low privilege user",
        )
        .unwrap();
        log.add_log_query(
            run_id,
            2,
            QueryKind::NextCommand,
            "sudo -l",
            "denied",
            zero(),
            5,
            2,
            "what should I try next?",
            "sudo -l",
        )
        .unwrap();

        // Only next-command rows are part of the command history.
        let history = log.get_cmd_history(run_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ("id".to_string(), "uid=1001".to_string()));
        assert_eq!(history[1].0, "sudo -l");
    }

    #[test]
    fn peek_matches_assigned_id() {
        let mut log = log();
        let run_id = log.create_run("gpt-4", 8192, "test", "{}").unwrap();
        assert_eq!(log.peek_next_message_id(run_id).unwrap(), 0);
        let id = log
            .add_message(run_id, None, &MessageRole::Status, "hello", 0, 0, zero())
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(log.peek_next_message_id(run_id).unwrap(), 1);
    }

    #[test]
    fn durable_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("straylight.sqlite3");

        let run_id = {
            let mut log = RunLog::open(&path).unwrap();
            let run_id = log.create_run("gpt-4", 8192, "persist", "{}").unwrap();
            log.add_message(run_id, Some("main"), &MessageRole::User, "p", 1, 0, zero())
                .unwrap();
            log.run_was_success(run_id, 1).unwrap();
            run_id
        };

        let log = RunLog::open(&path).unwrap();
        let run = log.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.state, "success");
        assert_eq!(log.get_messages(run_id).unwrap().len(), 1);
    }

    #[test]
    fn reopened_log_continues_message_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("straylight.sqlite3");

        let run_id = {
            let mut log = RunLog::open(&path).unwrap();
            let run_id = log.create_run("gpt-4", 8192, "resume", "{}").unwrap();
            log.add_message(run_id, None, &MessageRole::User, "a", 0, 0, zero())
                .unwrap();
            log.add_message(run_id, None, &MessageRole::Assistant, "b", 0, 0, zero())
                .unwrap();
            run_id
        };

        let mut log = RunLog::open(&path).unwrap();
        let id = log
            .add_message(run_id, None, &MessageRole::User, "c", 0, 0, zero())
            .unwrap();
        assert_eq!(id, 2, "ids continue after reopen");
    }
}
