//! Events and handlers for observing a run.
//!
//! The loop reports everything it does — turns, LLM answers, capability
//! invocations, the verdict — through [`RunEvent`] values handed to an
//! [`EventHandler`]. The CLI attaches [`LoggingHandler`] so every prompt,
//! answer, and tool result streams to the operator console in real time;
//! tests attach [`FnEventHandler`] to capture the sequence.

use std::time::Duration;
use tracing::{info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the loop during a run.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// A run was created and the loop is about to start.
    RunStarted {
        run_id: i64,
        model: &'a str,
        max_turns: u32,
    },
    /// A new turn is starting.
    TurnStarted { turn: u32, max_turns: u32 },
    /// The LLM answered on some conversation lane (`main`, `analysis`,
    /// `state`).
    AnswerReceived {
        conversation: &'a str,
        text: &'a str,
        tokens_query: u32,
        tokens_response: u32,
        duration: Duration,
    },
    /// A capability is about to execute.
    CapabilityStarted { name: &'a str, arguments: &'a str },
    /// A capability finished.
    CapabilityFinished {
        name: &'a str,
        result: &'a str,
        goal_reached: bool,
        duration: Duration,
    },
    /// The state summary was rewritten.
    StateUpdated { state: &'a str },
    /// The turn budget ran out without reaching the goal.
    TurnLimitReached { max_turns: u32 },
    /// The run reached a terminal state.
    RunFinished { success: bool, rounds: u32 },
}

// ── Handler trait ──────────────────────────────────────────────────

/// Observer for [`RunEvent`]s.
pub trait EventHandler: Sync {
    fn on_event(&self, event: &RunEvent<'_>);
}

/// Ignores all events.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &RunEvent<'_>) {}
}

/// Streams events through `tracing` — the default console view of a run.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::RunStarted {
                run_id,
                model,
                max_turns,
            } => {
                info!("run {run_id} started (model: {model}, max turns: {max_turns})");
            }
            RunEvent::TurnStarted { turn, max_turns } => {
                info!("── turn {turn}/{max_turns} ──");
            }
            RunEvent::AnswerReceived {
                conversation,
                text,
                tokens_query,
                tokens_response,
                duration,
            } => {
                info!(
                    "[{conversation}] {} ({tokens_query}/{tokens_response} tokens, {:.1}s)",
                    text.trim_end(),
                    duration.as_secs_f64(),
                );
            }
            RunEvent::CapabilityStarted { name, arguments } => {
                info!("[tool] {name}({arguments})");
            }
            RunEvent::CapabilityFinished {
                name,
                result,
                goal_reached,
                duration,
            } => {
                info!(
                    "[tool] {name} finished in {:.1}s (goal: {goal_reached})\n{}",
                    duration.as_secs_f64(),
                    result.trim_end(),
                );
            }
            RunEvent::StateUpdated { state } => {
                info!("updated state:\n{state}");
            }
            RunEvent::TurnLimitReached { max_turns } => {
                warn!("turn limit reached ({max_turns}) without achieving the goal");
            }
            RunEvent::RunFinished { success, rounds } => {
                info!("run finished after {rounds} round(s): success={success}");
            }
        }
    }
}

/// Closure-based handler, mainly for tests.
pub struct FnEventHandler<F: Fn(&RunEvent<'_>) + Sync> {
    f: F,
}

impl<F: Fn(&RunEvent<'_>) + Sync> FnEventHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: Fn(&RunEvent<'_>) + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: &RunEvent<'_>) {
        (self.f)(event)
    }
}

/// Fans events out to multiple handlers in registration order.
pub struct CompositeEventHandler<'a> {
    handlers: Vec<&'a dyn EventHandler>,
}

impl<'a> CompositeEventHandler<'a> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handlers.push(handler);
        self
    }
}

impl Default for CompositeEventHandler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler<'_> {
    fn on_event(&self, event: &RunEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fn_handler_receives_events() {
        let count = AtomicU32::new(0);
        let handler = FnEventHandler::new(|_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        handler.on_event(&RunEvent::TurnStarted {
            turn: 1,
            max_turns: 10,
        });
        handler.on_event(&RunEvent::RunFinished {
            success: true,
            rounds: 1,
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn composite_delegates_to_all() {
        let seen_a = Mutex::new(Vec::new());
        let seen_b = Mutex::new(Vec::new());
        let a = FnEventHandler::new(|e| {
            seen_a
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("{e:?}"));
        });
        let b = FnEventHandler::new(|e| {
            seen_b
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("{e:?}"));
        });
        let composite = CompositeEventHandler::new().with(&a).with(&b);
        composite.on_event(&RunEvent::TurnLimitReached { max_turns: 4 });

        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn noop_and_logging_accept_all_variants() {
        for handler in [&NoopHandler as &dyn EventHandler, &LoggingHandler] {
            handler.on_event(&RunEvent::RunStarted {
                run_id: 1,
                model: "gpt-4",
                max_turns: 10,
            });
            handler.on_event(&RunEvent::AnswerReceived {
                conversation: "main",
                text: "sudo -l",
                tokens_query: 100,
                tokens_response: 4,
                duration: Duration::from_secs(1),
            });
            handler.on_event(&RunEvent::CapabilityFinished {
                name: "exec_command",
                result: "denied",
                goal_reached: false,
                duration: Duration::from_millis(80),
            });
            handler.on_event(&RunEvent::StateUpdated { state: "- fact" });
        }
    }
}
