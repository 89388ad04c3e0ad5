//! Autonomous privilege-escalation agent against an SSH target.
//!
//! Reads the API key from the `OPENAI_API_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Basic run against a vulnerable VM
//! straylight --target-host 10.0.2.15 --target-user lowpriv --target-password trustno1
//!
//! # Smaller local model with explicit context window and more turns
//! straylight --target-host 10.0.2.15 --target-user lowpriv --target-password trustno1 \
//!   --base-url http://localhost:8080/v1 --model llama3 --context-size 8192 --max-turns 40
//!
//! # With the analysis and fact-list lanes enabled
//! straylight --target-host 10.0.2.15 --target-user lowpriv --target-password trustno1 \
//!   --enable-explanation --enable-update-state --tag "lab-vm-3"
//! ```
//!
//! Exit code 0 on graceful completion (goal reached or turns exhausted),
//! non-zero on an unhandled error.

use clap::Parser;
use serde::Serialize;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use straylight_rs::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Autonomous LLM-driven privilege escalation over SSH.
#[derive(Parser, Serialize)]
#[command(name = "straylight", version)]
struct Cli {
    // ── Target connection ──────────────────────────────────────
    /// Target hostname or IP address
    #[arg(long)]
    target_host: String,

    /// Target SSH port
    #[arg(long, default_value_t = 22)]
    target_port: u16,

    /// Low-privilege username on the target
    #[arg(long)]
    target_user: String,

    /// Password for the low-privilege user (not recorded in the run log)
    #[arg(long)]
    #[serde(skip_serializing)]
    target_password: String,

    /// Per-command SSH timeout in seconds
    #[arg(long, default_value_t = 10)]
    command_timeout: u64,

    // ── Model ──────────────────────────────────────────────────
    /// Model identifier
    #[arg(long, default_value = "gpt-4-turbo")]
    model: String,

    /// OpenAI-compatible endpoint base URL
    #[arg(long, default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// The model's context window, in tokens
    #[arg(long, default_value_t = 16384)]
    context_size: usize,

    // ── Run control ────────────────────────────────────────────
    /// Maximum turns before giving up
    #[arg(long, default_value_t = 20)]
    max_turns: u32,

    /// Free-text label for the run record
    #[arg(long, default_value = "")]
    tag: String,

    /// SQLite log destination
    #[arg(long, default_value = "straylight.sqlite3")]
    log_db: String,

    // ── Agent features ─────────────────────────────────────────
    /// Hint rendered into every next-command prompt
    #[arg(long, default_value = "")]
    hint: String,

    /// Ask the LLM to explain each command result
    #[arg(long)]
    enable_explanation: bool,

    /// Keep an LLM-maintained fact list about the target
    #[arg(long)]
    enable_update_state: bool,

    /// Do not feed command history back into prompts
    #[arg(long)]
    disable_history: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(verdict) => {
            if verdict.goal_reached {
                println!("Got root! (run {}, {} rounds)", verdict.run_id, verdict.rounds);
            } else {
                println!(
                    "Turn budget exhausted without root (run {}, {} rounds)",
                    verdict.run_id, verdict.rounds,
                );
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<RunVerdict, Box<dyn std::error::Error>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY is not set")?;

    let gateway = OpenAiGateway::new(GatewayConfig {
        api_key,
        base_url: cli.base_url.clone(),
        ..GatewayConfig::for_model(cli.model.clone(), cli.context_size)
    })?;

    let conn = Arc::new(
        SshConnection::new(
            cli.target_host.clone(),
            cli.target_port,
            cli.target_user.clone(),
            cli.target_password.clone(),
        )
        .with_timeout(Duration::from_secs(cli.command_timeout)),
    );

    let mut capabilities = CapabilitySet::new();
    capabilities.register(SshRunCommand::new(conn.clone()), None, true)?;
    capabilities.register(SshTestCredential::new(conn), None, false)?;

    let mut agent = LinuxPrivesc::new(Arc::new(gateway), capabilities)
        .with_credentials(cli.target_user.clone(), cli.target_password.clone())
        .with_hint(cli.hint.clone())
        .with_explanation(cli.enable_explanation)
        .with_update_state(cli.enable_update_state);
    if cli.disable_history {
        agent = agent.without_history();
    }

    let log = RunLog::open(&cli.log_db)?;
    let configuration = serde_json::to_string(&cli)?;

    let handler = LoggingHandler;
    let mut runner = Runner::new(agent, log)
        .with_max_turns(cli.max_turns)
        .with_event_handler(&handler);
    if !cli.tag.is_empty() {
        runner = runner.with_tag(cli.tag.clone());
    }

    Ok(runner.run(&configuration).await?)
}
