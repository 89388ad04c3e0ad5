//! The turn loop.
//!
//! [`Runner`] drives an [`Agent`] for up to `max_turns` rounds or until a
//! capability signals that the goal was reached. Each round the agent asks
//! the model for an action, executes it, records the outcome; the runner
//! owns run creation, section markers, terminal-state bookkeeping, and the
//! failure policy:
//!
//! - Turn exhaustion finalizes the run as a failure with the reason
//!   `"maximum turn number reached"` — and returns `Ok`, because an
//!   exhausted run is a graceful completion from the caller's perspective.
//! - Any error inside a round is recorded durably as the run's failure
//!   reason and then propagated to the caller. Fail loud, but record first.

use super::events::{EventHandler, NoopHandler, RunEvent};
use super::state::{MAX_TURNS_REACHED, RunState, StateError};
use crate::capability::core::DispatchError;
use crate::gateway::GatewayError;
use crate::store::db::{RunId, RunLog, StoreError};
use std::fmt;
use std::time::Instant;
use tracing::error;

// ── Errors ─────────────────────────────────────────────────────────

/// Fatal run errors. Recoverable problems (malformed commands, failed
/// logins, capability timeouts) never reach this type — they flow back into
/// history as ordinary results.
#[derive(Debug)]
pub enum RunError {
    Gateway(GatewayError),
    Store(StoreError),
    Dispatch(DispatchError),
    State(StateError),
    /// Configuration/setup problems detected before the first turn.
    Setup(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Gateway(e) => write!(f, "{e}"),
            RunError::Store(e) => write!(f, "{e}"),
            RunError::Dispatch(e) => write!(f, "{e}"),
            RunError::State(e) => write!(f, "{e}"),
            RunError::Setup(msg) => write!(f, "setup error: {msg}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<GatewayError> for RunError {
    fn from(e: GatewayError) -> Self {
        RunError::Gateway(e)
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Store(e)
    }
}

impl From<DispatchError> for RunError {
    fn from(e: DispatchError) -> Self {
        RunError::Dispatch(e)
    }
}

impl From<StateError> for RunError {
    fn from(e: StateError) -> Self {
        RunError::State(e)
    }
}

// ── Agent trait ────────────────────────────────────────────────────

/// Everything an agent needs to touch during a round.
pub struct RunContext<'a> {
    pub run_id: RunId,
    pub log: &'a mut RunLog,
    pub handler: &'a dyn EventHandler,
}

impl RunContext<'_> {
    /// Emit an event to the attached handler.
    pub fn emit(&self, event: RunEvent<'_>) {
        self.handler.on_event(&event);
    }
}

/// One concrete strategy driven by the [`Runner`].
///
/// `perform_round` returns `Ok(true)` when a capability signaled the goal,
/// `Ok(false)` to keep going, and `Err` only for fatal conditions.
pub trait Agent {
    /// Agent name, recorded as the run tag by default.
    fn name(&self) -> &str;

    /// Model identifier for the run record.
    fn model(&self) -> String;

    /// Context window for the run record.
    fn context_size(&self) -> usize;

    /// One-time setup before the first turn. Configuration problems must be
    /// reported here so a run that cannot make progress never starts.
    fn before_run(
        &mut self,
        _ctx: &mut RunContext<'_>,
    ) -> impl Future<Output = Result<(), RunError>> {
        async { Ok(()) }
    }

    /// Perform one turn. Returns whether the goal was reached.
    fn perform_round(
        &mut self,
        turn: u32,
        ctx: &mut RunContext<'_>,
    ) -> impl Future<Output = Result<bool, RunError>>;

    /// Teardown after the final turn, before the verdict is persisted.
    fn after_run(
        &mut self,
        _ctx: &mut RunContext<'_>,
    ) -> impl Future<Output = Result<(), RunError>> {
        async { Ok(()) }
    }
}

// ── Verdict ────────────────────────────────────────────────────────

/// The outcome of a completed (successful or exhausted) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVerdict {
    pub run_id: RunId,
    pub goal_reached: bool,
    pub rounds: u32,
}

// ── Runner ─────────────────────────────────────────────────────────

static NOOP: NoopHandler = NoopHandler;

/// Drives one [`Agent`] through one run against one target.
pub struct Runner<'h, A: Agent> {
    agent: A,
    log: RunLog,
    max_turns: u32,
    handler: &'h dyn EventHandler,
    tag: Option<String>,
}

impl<'h, A: Agent> Runner<'h, A> {
    pub fn new(agent: A, log: RunLog) -> Self {
        Self {
            agent,
            log,
            max_turns: 10,
            handler: &NOOP,
            tag: None,
        }
    }

    /// Override the turn budget (default 10).
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Attach an event handler for console streaming / observation.
    pub fn with_event_handler(mut self, handler: &'h dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Free-text label for the run record (default: the agent's name).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// The underlying run log (for inspection after a run).
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Run the loop to a verdict.
    ///
    /// `configuration` is an opaque serialized snapshot recorded with the
    /// run for later replay.
    pub async fn run(&mut self, configuration: &str) -> Result<RunVerdict, RunError> {
        let model = self.agent.model();
        let tag = self
            .tag
            .clone()
            .unwrap_or_else(|| self.agent.name().to_string());

        let run_id =
            self.log
                .create_run(&model, self.agent.context_size(), &tag, configuration)?;
        self.handler.on_event(&RunEvent::RunStarted {
            run_id,
            model: &model,
            max_turns: self.max_turns,
        });

        let mut state = RunState::new();

        let mut ctx = RunContext {
            run_id,
            log: &mut self.log,
            handler: self.handler,
        };
        if let Err(e) = self.agent.before_run(&mut ctx).await {
            return Self::record_failure(&mut self.log, run_id, &mut state, e);
        }

        state.begin()?;
        let mut goal_reached = false;

        while state.turn() <= self.max_turns && !goal_reached {
            let turn = state.turn();
            self.handler.on_event(&RunEvent::TurnStarted {
                turn,
                max_turns: self.max_turns,
            });

            let round_start = Instant::now();
            let from_message = self.log.peek_next_message_id(run_id)?;

            let mut ctx = RunContext {
                run_id,
                log: &mut self.log,
                handler: self.handler,
            };
            match self.agent.perform_round(turn, &mut ctx).await {
                Ok(goal) => {
                    goal_reached = goal;
                    state.round_completed()?;
                }
                Err(e) => {
                    return Self::record_failure(&mut self.log, run_id, &mut state, e);
                }
            }

            let to_message = self.log.peek_next_message_id(run_id)?.saturating_sub(1);
            self.log.add_section(
                run_id,
                &format!("round {turn}"),
                from_message,
                to_message,
                round_start.elapsed(),
            )?;
        }

        let mut ctx = RunContext {
            run_id,
            log: &mut self.log,
            handler: self.handler,
        };
        if let Err(e) = self.agent.after_run(&mut ctx).await {
            return Self::record_failure(&mut self.log, run_id, &mut state, e);
        }

        if goal_reached {
            state.succeed()?;
            self.log.run_was_success(run_id, state.rounds_completed())?;
        } else {
            state.fail(MAX_TURNS_REACHED)?;
            self.log
                .run_was_failure(run_id, MAX_TURNS_REACHED, state.rounds_completed())?;
            self.handler.on_event(&RunEvent::TurnLimitReached {
                max_turns: self.max_turns,
            });
        }

        self.handler.on_event(&RunEvent::RunFinished {
            success: goal_reached,
            rounds: state.rounds_completed(),
        });

        Ok(RunVerdict {
            run_id,
            goal_reached,
            rounds: state.rounds_completed(),
        })
    }

    /// Durably record a fatal error as the run's failure reason, then
    /// propagate it.
    fn record_failure(
        log: &mut RunLog,
        run_id: RunId,
        state: &mut RunState,
        e: RunError,
    ) -> Result<RunVerdict, RunError> {
        error!("run {run_id} failed: {e}");
        let _ = state.fail(e.to_string());
        log.run_was_failure(run_id, &e.to_string(), state.rounds_completed())?;
        Err(e)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Signals the goal on a chosen turn; records the turns it saw.
    struct ScriptedAgent {
        goal_on_turn: Option<u32>,
        fail_on_turn: Option<u32>,
        turns_seen: Vec<u32>,
    }

    impl ScriptedAgent {
        fn goal_on(turn: u32) -> Self {
            Self {
                goal_on_turn: Some(turn),
                fail_on_turn: None,
                turns_seen: Vec::new(),
            }
        }

        fn never_succeeds() -> Self {
            Self {
                goal_on_turn: None,
                fail_on_turn: None,
                turns_seen: Vec::new(),
            }
        }

        fn fails_on(turn: u32) -> Self {
            Self {
                goal_on_turn: None,
                fail_on_turn: Some(turn),
                turns_seen: Vec::new(),
            }
        }
    }

    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> String {
            "fake-model".to_string()
        }

        fn context_size(&self) -> usize {
            1024
        }

        async fn perform_round(
            &mut self,
            turn: u32,
            ctx: &mut RunContext<'_>,
        ) -> Result<bool, RunError> {
            self.turns_seen.push(turn);
            ctx.log.add_message(
                ctx.run_id,
                Some("main"),
                &crate::MessageRole::Assistant,
                &format!("turn {turn}"),
                1,
                1,
                std::time::Duration::ZERO,
            )?;
            if self.fail_on_turn == Some(turn) {
                return Err(RunError::Setup(format!("boom on turn {turn}")));
            }
            Ok(self.goal_on_turn == Some(turn))
        }
    }

    fn runner(agent: ScriptedAgent) -> Runner<'static, ScriptedAgent> {
        Runner::new(agent, RunLog::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn success_after_exactly_k_turns() {
        let mut runner = runner(ScriptedAgent::goal_on(3)).with_max_turns(10);
        let verdict = runner.run("{}").await.unwrap();

        assert!(verdict.goal_reached);
        assert_eq!(verdict.rounds, 3);
        assert_eq!(runner.agent.turns_seen, vec![1, 2, 3]);

        let run = runner.log().get_run(verdict.run_id).unwrap().unwrap();
        assert_eq!(run.state, "success");
        assert_eq!(run.rounds, 3);
        assert!(run.stopped_at.is_some());
    }

    #[tokio::test]
    async fn exhaustion_runs_exactly_max_turns() {
        let mut runner = runner(ScriptedAgent::never_succeeds()).with_max_turns(4);
        let verdict = runner.run("{}").await.unwrap();

        assert!(!verdict.goal_reached);
        assert_eq!(verdict.rounds, 4);
        assert_eq!(runner.agent.turns_seen, vec![1, 2, 3, 4]);

        let run = runner.log().get_run(verdict.run_id).unwrap().unwrap();
        assert_eq!(run.state, "maximum turn number reached");
        assert_eq!(run.rounds, 4);
    }

    #[tokio::test]
    async fn goal_on_last_turn_is_success_not_exhaustion() {
        let mut runner = runner(ScriptedAgent::goal_on(4)).with_max_turns(4);
        let verdict = runner.run("{}").await.unwrap();
        assert!(verdict.goal_reached);
        assert_eq!(verdict.rounds, 4);
        let run = runner.log().get_run(verdict.run_id).unwrap().unwrap();
        assert_eq!(run.state, "success");
    }

    #[tokio::test]
    async fn round_error_recorded_then_propagated() {
        let mut runner = runner(ScriptedAgent::fails_on(2)).with_max_turns(10);
        let err = runner.run("{}").await.unwrap_err();
        assert!(err.to_string().contains("boom on turn 2"));

        // The failure is durably recorded before the error propagates.
        let run = runner.log().get_run(1).unwrap().unwrap();
        assert!(run.state.contains("boom on turn 2"));
        assert!(run.stopped_at.is_some());
    }

    #[tokio::test]
    async fn sections_recorded_per_round() {
        let mut runner = runner(ScriptedAgent::goal_on(2)).with_max_turns(10);
        let verdict = runner.run("{}").await.unwrap();

        let messages = runner.log().get_messages(verdict.run_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "turn 1");
        assert_eq!(messages[1].content, "turn 2");
    }

    #[tokio::test]
    async fn run_record_carries_model_tag_and_config() {
        let mut runner = runner(ScriptedAgent::goal_on(1))
            .with_max_turns(1)
            .with_tag("ci-box");
        let verdict = runner.run("{\"target\":\"10.0.2.15\"}").await.unwrap();

        let run = runner.log().get_run(verdict.run_id).unwrap().unwrap();
        assert_eq!(run.model, "fake-model");
        assert_eq!(run.context_size, 1024);
        assert_eq!(run.tag, "ci-box");
        assert!(run.configuration.contains("10.0.2.15"));
    }

    #[tokio::test]
    async fn events_fire_in_order() {
        let events = Mutex::new(Vec::new());
        let handler = FnEventHandlerFor(&events);

        struct FnEventHandlerFor<'a>(&'a Mutex<Vec<String>>);
        impl EventHandler for FnEventHandlerFor<'_> {
            fn on_event(&self, event: &RunEvent<'_>) {
                let label = match event {
                    RunEvent::RunStarted { .. } => "started",
                    RunEvent::TurnStarted { .. } => "turn",
                    RunEvent::TurnLimitReached { .. } => "limit",
                    RunEvent::RunFinished { .. } => "finished",
                    _ => "other",
                };
                self.0
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(label.to_string());
            }
        }

        let mut runner = Runner::new(
            ScriptedAgent::never_succeeds(),
            RunLog::open_in_memory().unwrap(),
        )
        .with_max_turns(2)
        .with_event_handler(&handler);
        runner.run("{}").await.unwrap();

        let seen = events.lock().unwrap();
        assert_eq!(
            *seen,
            vec!["started", "turn", "turn", "limit", "finished"]
        );
    }

    #[tokio::test]
    async fn zero_max_turns_is_immediate_exhaustion() {
        let mut runner = runner(ScriptedAgent::goal_on(1)).with_max_turns(0);
        let verdict = runner.run("{}").await.unwrap();
        assert!(!verdict.goal_reached);
        assert_eq!(verdict.rounds, 0);
        let run = runner.log().get_run(verdict.run_id).unwrap().unwrap();
        assert_eq!(run.state, "maximum turn number reached");
    }
}
