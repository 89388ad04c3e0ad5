//! The Linux privilege-escalation agent.
//!
//! One round: build a bounded prompt (capability block + optional hint +
//! optional fact list + token-budgeted command history), ask the gateway for
//! the next command, clean and dispatch it, feed the outcome back into the
//! sliding history, and optionally run two extra LLM lanes — a one-sentence
//! result analysis (`analysis`) and a fact-list rewrite (`state`). Each lane
//! is logged under its own conversation label and trims its input against
//! its own reserved budget.
//!
//! Budget math per turn:
//!
//! ```text
//! history budget = context_size - SAFETY_MARGIN - template_tokens - state_tokens
//! ```
//!
//! where `state_tokens` is zero unless the fact-list lane is enabled.

use super::runner::{Agent, RunContext, RunError};
use super::templates::{self, PromptTemplate};
use crate::MessageRole;
use crate::capability::core::CapabilitySet;
use crate::capability::fixer::cmd_output_fixer;
use crate::context::history::SlidingCliHistory;
use crate::context::trim::{SAFETY_MARGIN, trim_back};
use crate::gateway::{LlmGateway, LlmReply};
use crate::run::events::RunEvent;
use crate::store::db::QueryKind;
use std::sync::Arc;
use tracing::debug;

/// Privilege escalation against a Linux target over SSH.
pub struct LinuxPrivesc {
    gateway: Arc<dyn LlmGateway>,
    capabilities: CapabilitySet,
    system: String,
    target_user: String,
    conn_user: String,
    conn_password: String,
    hint: String,
    enable_explanation: bool,
    enable_update_state: bool,
    disable_history: bool,

    history: Option<SlidingCliHistory>,
    state: String,
    max_history_tokens: usize,
}

impl LinuxPrivesc {
    pub fn new(gateway: Arc<dyn LlmGateway>, capabilities: CapabilitySet) -> Self {
        Self {
            gateway,
            capabilities,
            system: "linux".to_string(),
            target_user: "root".to_string(),
            conn_user: String::new(),
            conn_password: String::new(),
            hint: String::new(),
            enable_explanation: false,
            enable_update_state: false,
            disable_history: false,
            history: None,
            state: String::new(),
            max_history_tokens: 0,
        }
    }

    /// The low-privilege credentials rendered into the prompt.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.conn_user = user.into();
        self.conn_password = password.into();
        self
    }

    /// Free-text hint rendered into every next-command prompt.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    /// Ask the LLM to explain each command result (extra `analysis` lane).
    pub fn with_explanation(mut self, enabled: bool) -> Self {
        self.enable_explanation = enabled;
        self
    }

    /// Keep an LLM-maintained fact list about the target (extra `state` lane).
    pub fn with_update_state(mut self, enabled: bool) -> Self {
        self.enable_update_state = enabled;
        self
    }

    /// Drop the command history from prompts entirely.
    pub fn without_history(mut self) -> Self {
        self.disable_history = true;
        self
    }

    /// Override the target user to escalate to (default `root`).
    pub fn with_target_user(mut self, user: impl Into<String>) -> Self {
        self.target_user = user.into();
        self
    }

    fn state_tokens(&self) -> usize {
        if self.enable_update_state {
            self.gateway.counter().count_tokens(&self.state)
        } else {
            0
        }
    }

    /// Ask for the next command; logs the round trip under `main` and
    /// returns the cleaned command plus the assistant message id.
    async fn next_command(
        &mut self,
        ctx: &mut RunContext<'_>,
    ) -> Result<(String, i64, LlmReply), RunError> {
        let budget = self.max_history_tokens.saturating_sub(self.state_tokens());
        let history_text = match &self.history {
            Some(h) => h.get(budget),
            None => String::new(),
        };
        debug!("history budget: {budget} tokens");

        let prompt = PromptTemplate::new(templates::NEXT_COMMAND).render(&[
            ("user", &self.conn_user),
            ("password", &self.conn_password),
            ("system", &self.system),
            ("target_user", &self.target_user),
            ("capabilities", &self.capabilities.describe_block()),
            ("hint", &templates::hint_block(&self.hint)),
            ("state", &templates::state_block(if self.enable_update_state {
                &self.state
            } else {
                ""
            })),
            ("history", &history_text),
        ]);

        let reply = self.gateway.get_response(&prompt).await?;
        ctx.log.add_message(
            ctx.run_id,
            Some("main"),
            &MessageRole::User,
            &reply.prompt,
            reply.tokens_query,
            0,
            std::time::Duration::ZERO,
        )?;
        let message_id = ctx.log.add_message(
            ctx.run_id,
            Some("main"),
            &MessageRole::Assistant,
            &reply.result,
            reply.tokens_query,
            reply.tokens_response,
            reply.duration,
        )?;
        ctx.emit(RunEvent::AnswerReceived {
            conversation: "main",
            text: &reply.result,
            tokens_query: reply.tokens_query,
            tokens_response: reply.tokens_response,
            duration: reply.duration,
        });

        let cmd = cmd_output_fixer(&reply.result);
        Ok((cmd, message_id, reply))
    }

    /// The optional `analysis` lane: one-sentence explanation of the result.
    async fn analyze_result(
        &mut self,
        turn: u32,
        cmd: &str,
        result: &str,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), RunError> {
        let counter = self.gateway.counter();
        let target = self
            .gateway
            .context_size()
            .saturating_sub(SAFETY_MARGIN)
            .saturating_sub(self.state_tokens());
        // The head of a long result carries the signal; cut from the back.
        let trimmed = trim_back(counter.as_ref(), target, result);

        let prompt = PromptTemplate::new(templates::ANALYZE_RESULT).render(&[
            ("cmd", cmd),
            ("resp", &trimmed),
            ("facts", &self.state),
            ("system", &self.system),
            ("target_user", &self.target_user),
        ]);

        let reply = self.gateway.get_response(&prompt).await?;
        ctx.log.add_message(
            ctx.run_id,
            Some("analysis"),
            &MessageRole::User,
            &reply.prompt,
            reply.tokens_query,
            0,
            std::time::Duration::ZERO,
        )?;
        ctx.log.add_message(
            ctx.run_id,
            Some("analysis"),
            &MessageRole::Assistant,
            &reply.result,
            reply.tokens_query,
            reply.tokens_response,
            reply.duration,
        )?;
        ctx.log.add_log_query(
            ctx.run_id,
            turn,
            QueryKind::AnalyzeResponse,
            cmd,
            &reply.result,
            reply.duration,
            reply.tokens_query,
            reply.tokens_response,
            &reply.prompt,
            &reply.result,
        )?;
        ctx.emit(RunEvent::AnswerReceived {
            conversation: "analysis",
            text: &reply.result,
            tokens_query: reply.tokens_query,
            tokens_response: reply.tokens_response,
            duration: reply.duration,
        });
        Ok(())
    }

    /// The optional `state` lane: rewrite the fact list from the latest
    /// command and result.
    async fn update_state(
        &mut self,
        turn: u32,
        cmd: &str,
        result: &str,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), RunError> {
        let counter = self.gateway.counter();
        let target = self
            .gateway
            .context_size()
            .saturating_sub(SAFETY_MARGIN)
            .saturating_sub(self.state_tokens());
        let trimmed = trim_back(counter.as_ref(), target, result);

        let prompt = PromptTemplate::new(templates::UPDATE_STATE).render(&[
            ("cmd", cmd),
            ("resp", &trimmed),
            ("facts", &self.state),
            ("system", &self.system),
        ]);

        let reply = self.gateway.get_response(&prompt).await?;
        self.state = reply.result.clone();

        ctx.log.add_message(
            ctx.run_id,
            Some("state"),
            &MessageRole::User,
            &reply.prompt,
            reply.tokens_query,
            0,
            std::time::Duration::ZERO,
        )?;
        ctx.log.add_message(
            ctx.run_id,
            Some("state"),
            &MessageRole::Assistant,
            &reply.result,
            reply.tokens_query,
            reply.tokens_response,
            reply.duration,
        )?;
        ctx.log.add_log_query(
            ctx.run_id,
            turn,
            QueryKind::UpdateState,
            cmd,
            &reply.result,
            reply.duration,
            reply.tokens_query,
            reply.tokens_response,
            &reply.prompt,
            &reply.result,
        )?;
        ctx.emit(RunEvent::StateUpdated { state: &self.state });
        Ok(())
    }
}

impl Agent for LinuxPrivesc {
    fn name(&self) -> &str {
        "linux-privesc"
    }

    fn model(&self) -> String {
        self.gateway.model().to_string()
    }

    fn context_size(&self) -> usize {
        self.gateway.context_size()
    }

    async fn before_run(&mut self, ctx: &mut RunContext<'_>) -> Result<(), RunError> {
        // A free-text flow without a default capability cannot make
        // progress — refuse to start the run.
        if !self.capabilities.has_default() {
            return Err(RunError::Setup(
                "no default capability registered; free-text dispatch would have no fallback"
                    .to_string(),
            ));
        }

        if !self.disable_history {
            self.history = Some(SlidingCliHistory::new(
                self.gateway.counter(),
                self.gateway.context_size(),
            ));
        }

        let template_tokens = self
            .gateway
            .counter()
            .count_tokens(templates::NEXT_COMMAND);
        self.max_history_tokens = self
            .gateway
            .context_size()
            .saturating_sub(SAFETY_MARGIN)
            .saturating_sub(template_tokens);
        if self.max_history_tokens == 0 {
            return Err(RunError::Setup(format!(
                "context size {} cannot fit the prompt template ({template_tokens} tokens) \
                 plus the safety margin",
                self.gateway.context_size(),
            )));
        }

        if self.enable_update_state && self.state.is_empty() {
            self.state = format!(
                "- this is a {} system\n- your low privilege user credentials are {}:{}",
                self.system, self.conn_user, self.conn_password,
            );
        }

        if !self.hint.is_empty() {
            ctx.log.add_message(
                ctx.run_id,
                None,
                &MessageRole::Status,
                &format!("using hint: {}", self.hint),
                0,
                0,
                std::time::Duration::ZERO,
            )?;
        }
        Ok(())
    }

    async fn perform_round(&mut self, turn: u32, ctx: &mut RunContext<'_>) -> Result<bool, RunError> {
        // Ask for the next command and run it.
        let (cmd, message_id, reply) = self.next_command(ctx).await?;

        let dispatch = self.capabilities.dispatch_text(&cmd).await?;
        ctx.emit(RunEvent::CapabilityFinished {
            name: &dispatch.capability,
            result: &dispatch.outcome.text,
            goal_reached: dispatch.outcome.goal_reached,
            duration: dispatch.duration,
        });

        ctx.log.add_tool_call(
            ctx.run_id,
            message_id,
            &dispatch.capability,
            &dispatch.arguments,
            &dispatch.outcome.text,
            dispatch.duration,
        )?;
        ctx.log.add_log_query(
            ctx.run_id,
            turn,
            QueryKind::NextCommand,
            &cmd,
            &dispatch.outcome.text,
            reply.duration,
            reply.tokens_query,
            reply.tokens_response,
            &reply.prompt,
            &reply.result,
        )?;

        if let Some(history) = self.history.as_mut() {
            history.add(&cmd, &dispatch.outcome.text);
        }

        if self.enable_explanation {
            self.analyze_result(turn, &cmd, &dispatch.outcome.text, ctx).await?;
        }
        if self.enable_update_state {
            self.update_state(turn, &cmd, &dispatch.outcome.text, ctx).await?;
        }

        Ok(dispatch.outcome.goal_reached)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
