//! SSH transport and the capabilities built on it.
//!
//! The [`Exec`] trait is the seam between capabilities and the wire: it runs
//! a command on the target and classifies failures into the three classes
//! the capabilities care about — authentication (never retried), transient
//! (retried with backoff by the capability that owns the call), and
//! everything else. [`SshConnection`] is the production implementation,
//! shelling out to `ssh` via `sshpass` the same way the shell tool family
//! shells out locally.
//!
//! Two capabilities live here:
//!
//! - [`SshRunCommand`] (`exec_command`) — the default capability. Runs a
//!   command, watches the final output line for a root prompt, and reports
//!   the goal when one appears.
//! - [`SshTestCredential`] (`test_credential`) — attempts a login with the
//!   given credentials and checks `whoami` for root.

use super::core::{Capability, CapabilityFuture, CapabilityOutcome, ParamSpec, ParamValue};
use crate::gateway::retry::RetryConfig;
use crate::json_schema_for;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Errors ─────────────────────────────────────────────────────────

/// Failure classes for a transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The target rejected the credentials. Never retried.
    Auth(String),
    /// Connection-level failure (refused, reset, unreachable, connect
    /// timeout). Safe to retry a bounded number of times.
    Transient(String),
    /// Anything else (spawn failure, protocol error).
    Other(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Auth(msg) => write!(f, "authentication failed: {msg}"),
            ExecError::Transient(msg) => write!(f, "connection failed: {msg}"),
            ExecError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

// ── Exec trait ─────────────────────────────────────────────────────

/// Boxed future returned by [`Exec`] methods.
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ExecError>> + Send + 'a>>;

/// A command transport against one target host.
///
/// Implementations own the connection parameters (host, credentials,
/// timeout). Capabilities are written against this trait so they can be
/// exercised with fake transports in tests.
pub trait Exec: Send + Sync {
    /// The target hostname (used for root-prompt detection).
    fn hostname(&self) -> &str;

    /// The username the connection is configured with.
    fn username(&self) -> &str;

    /// Run a command as the configured user. A command that outlives the
    /// execution timeout resolves to its partial output plus a timeout
    /// marker — not an error.
    fn run(&self, command: &str) -> ExecFuture<'_>;

    /// Run a command as a different user with an explicit password — the
    /// credential-testing path. Here a timeout is a connection problem and
    /// surfaces as [`ExecError::Transient`].
    fn run_as(&self, username: &str, password: &str, command: &str) -> ExecFuture<'_>;
}

// ── SshConnection ──────────────────────────────────────────────────

/// SSH transport that shells out to `sshpass`/`ssh`.
#[derive(Clone, Debug)]
pub struct SshConnection {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

/// stderr substrings that mark a connection-level (retryable) ssh failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection timed out",
    "connection reset",
    "connection closed by remote host",
    "no route to host",
    "network is unreachable",
];

struct ExecCapture {
    stdout: String,
    stderr: String,
    status: Option<i32>,
    timed_out: bool,
}

impl SshConnection {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-command execution timeout (default 10s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exec(
        &self,
        username: &str,
        password: &str,
        command: &str,
    ) -> Result<ExecCapture, ExecError> {
        use tokio::io::AsyncReadExt;

        debug!("ssh {}@{}:{} $ {}", username, self.host, self.port, command);

        let mut child = tokio::process::Command::new("sshpass")
            .arg("-p")
            .arg(password)
            .arg("ssh")
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "LogLevel=ERROR",
                "-o",
                "ConnectTimeout=5",
                "-o",
                "NumberOfPasswordPrompts=1",
            ])
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{username}@{}", self.host))
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Other(format!("failed to spawn ssh: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Other("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Other("child stderr not captured".to_string()))?;

        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        // Read both streams until EOF or the execution timeout. On timeout
        // the child is killed and whatever was captured so far is kept.
        let timed_out = tokio::time::timeout(self.timeout, async {
            let _ = tokio::join!(
                stdout.read_to_end(&mut out_buf),
                stderr.read_to_end(&mut err_buf)
            );
        })
        .await
        .is_err();

        let status = if timed_out {
            let _ = child.start_kill();
            None
        } else {
            Some(
                child
                    .wait()
                    .await
                    .map_err(|e| ExecError::Other(format!("failed to reap ssh: {e}")))?,
            )
        };

        Ok(ExecCapture {
            stdout: String::from_utf8_lossy(&out_buf).into_owned(),
            stderr: String::from_utf8_lossy(&err_buf).into_owned(),
            status: status.and_then(|s| s.code()),
            timed_out,
        })
    }
}

/// Classify a completed (non-timed-out) capture. ssh reserves exit 255 for
/// its own failures; sshpass exits 5 on a rejected password. Everything
/// else — including non-zero remote exit codes — is normal command output.
fn classify(capture: ExecCapture) -> Result<String, ExecError> {
    match capture.status {
        Some(5) => Err(ExecError::Auth(
            "invalid password (sshpass exit 5)".to_string(),
        )),
        Some(255) => {
            let lower = capture.stderr.to_lowercase();
            if lower.contains("permission denied") {
                Err(ExecError::Auth(capture.stderr.trim().to_string()))
            } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
                Err(ExecError::Transient(capture.stderr.trim().to_string()))
            } else {
                Err(ExecError::Other(capture.stderr.trim().to_string()))
            }
        }
        _ => {
            let mut output = capture.stdout;
            if !capture.stderr.trim().is_empty() {
                output.push_str(&capture.stderr);
            }
            Ok(output)
        }
    }
}

impl Exec for SshConnection {
    fn hostname(&self) -> &str {
        &self.host
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn run(&self, command: &str) -> ExecFuture<'_> {
        let command = command.to_string();
        Box::pin(async move {
            let capture = self.exec(&self.username, &self.password, &command).await?;
            if capture.timed_out {
                info!("command timed out, keeping partial output");
                let mut output = capture.stdout;
                output.push_str(&capture.stderr);
                output.push_str(&format!(
                    "\n<command timed out after {}s>",
                    self.timeout.as_secs()
                ));
                return Ok(output);
            }
            classify(capture)
        })
    }

    fn run_as(&self, username: &str, password: &str, command: &str) -> ExecFuture<'_> {
        let username = username.to_string();
        let password = password.to_string();
        let command = command.to_string();
        Box::pin(async move {
            let capture = self.exec(&username, &password, &command).await?;
            if capture.timed_out {
                return Err(ExecError::Transient(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            classify(capture)
        })
    }
}

// ── Root detection ─────────────────────────────────────────────────

static GOT_ROOT_PROMPTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^# $").expect("root prompt regex is valid"),
        Regex::new(r"^bash-[0-9]+\.[0-9]# $").expect("root prompt regex is valid"),
    ]
});

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi regex is valid")
});

/// Remove ANSI escape sequences from a terminal line.
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Whether a shell's final output line looks like a root prompt.
pub fn got_root(hostname: &str, last_line: &str) -> bool {
    GOT_ROOT_PROMPTS.iter().any(|re| re.is_match(last_line))
        || last_line.starts_with(&format!("root@{hostname}:"))
}

// ── SshRunCommand ──────────────────────────────────────────────────

/// Typed arguments for `exec_command` (function-calling dispatch).
#[derive(Deserialize, JsonSchema)]
pub struct ExecCommandArgs {
    /// The shell command to run on the target. Must not require user
    /// interaction.
    pub command: String,
}

/// Typed arguments for `test_credential` (function-calling dispatch).
#[derive(Deserialize, JsonSchema)]
pub struct TestCredentialArgs {
    /// Username to try.
    pub username: String,
    /// Password to try.
    pub password: String,
}

/// Run a shell command on the target. The default capability: any free-text
/// LLM output that doesn't name another capability lands here.
pub struct SshRunCommand {
    conn: Arc<dyn Exec>,
}

impl SshRunCommand {
    pub fn new(conn: Arc<dyn Exec>) -> Self {
        Self { conn }
    }
}

impl Capability for SshRunCommand {
    fn name(&self) -> &str {
        "exec_command"
    }

    fn describe(&self) -> String {
        "give a command to be executed and I will respond with the terminal output when \
         running this command over SSH on the target machine. The given command must not \
         require user interaction. Do not use quotation marks in front and after your command."
            .to_string()
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::str("command")];
        PARAMS
    }

    fn schema(&self) -> serde_json::Value {
        json_schema_for::<ExecCommandArgs>()
    }

    fn execute(&self, args: &[ParamValue]) -> CapabilityFuture<'_> {
        let mut command = args
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Box::pin(async move {
            // Some models echo the capability name in front of the command.
            if command.starts_with(self.name()) {
                command = command
                    .split_once(' ')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_default();
            }

            match self.conn.run(&command).await {
                Ok(output) => {
                    let last_line = strip_ansi(output.lines().last().unwrap_or(""));
                    let root = got_root(self.conn.hostname(), &last_line);
                    if root {
                        info!("root prompt detected in command output");
                        CapabilityOutcome::goal(output)
                    } else {
                        CapabilityOutcome::ok(output)
                    }
                }
                Err(e) => CapabilityOutcome::ok(format!("error executing command: {e}")),
            }
        })
    }
}

// ── SshTestCredential ──────────────────────────────────────────────

/// Test a username/password pair against the target.
///
/// Authentication failures are surfaced immediately — retrying wrong
/// credentials cannot succeed. Transient connection errors are retried with
/// backoff up to the configured bound.
pub struct SshTestCredential {
    conn: Arc<dyn Exec>,
    retry: RetryConfig,
}

impl SshTestCredential {
    pub fn new(conn: Arc<dyn Exec>) -> Self {
        Self {
            conn,
            retry: RetryConfig::with_retries(3),
        }
    }

    /// Override the transient-error retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Capability for SshTestCredential {
    fn name(&self) -> &str {
        "test_credential"
    }

    fn describe(&self) -> String {
        "give credentials to be tested".to_string()
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::str("username"), ParamSpec::str("password")];
        PARAMS
    }

    fn schema(&self) -> serde_json::Value {
        json_schema_for::<TestCredentialArgs>()
    }

    fn execute(&self, args: &[ParamValue]) -> CapabilityFuture<'_> {
        let username = args
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let password = args
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Box::pin(async move {
            let mut attempt: u32 = 0;
            loop {
                match self.conn.run_as(&username, &password, "whoami").await {
                    Ok(output) => {
                        let user = output.trim_matches(['\n', '\r', ' ']);
                        return if user == "root" {
                            CapabilityOutcome::goal("Login as root was successful\n")
                        } else {
                            CapabilityOutcome::ok(
                                "Authentication successful, but user is not root\n",
                            )
                        };
                    }
                    Err(ExecError::Auth(_)) => {
                        return CapabilityOutcome::ok(
                            "Authentication error, credentials are wrong\n",
                        );
                    }
                    Err(ExecError::Transient(msg)) => {
                        if attempt >= self.retry.max_retries {
                            return CapabilityOutcome::ok(format!(
                                "connection failed after {} attempts: {msg}",
                                attempt + 1
                            ));
                        }
                        warn!("transient connection error (attempt {}): {msg}", attempt + 1);
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    Err(ExecError::Other(msg)) => {
                        return CapabilityOutcome::ok(format!("error testing credentials: {msg}"));
                    }
                }
            }
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted fake transport: `run_as` pops responses from a queue and
    /// counts attempts.
    struct FakeExec {
        host: String,
        run_output: String,
        responses: Mutex<Vec<Result<String, ExecError>>>,
        attempts: AtomicU32,
    }

    impl FakeExec {
        fn with_responses(responses: Vec<Result<String, ExecError>>) -> Arc<Self> {
            Arc::new(Self {
                host: "testbox".into(),
                run_output: String::new(),
                responses: Mutex::new(responses),
                attempts: AtomicU32::new(0),
            })
        }

        fn with_run_output(output: &str) -> Arc<Self> {
            Arc::new(Self {
                host: "testbox".into(),
                run_output: output.into(),
                responses: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
            })
        }
    }

    impl Exec for FakeExec {
        fn hostname(&self) -> &str {
            &self.host
        }

        fn username(&self) -> &str {
            "lowpriv"
        }

        fn run(&self, _command: &str) -> ExecFuture<'_> {
            let out = self.run_output.clone();
            Box::pin(async move { Ok(out) })
        }

        fn run_as(&self, _username: &str, _password: &str, _command: &str) -> ExecFuture<'_> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop()
                .unwrap_or(Err(ExecError::Other("script exhausted".into())));
            Box::pin(async move { next })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::with_retries(3)
        }
    }

    #[test]
    fn root_prompt_detection() {
        assert!(got_root("testbox", "# "));
        assert!(got_root("testbox", "bash-5.1# "));
        assert!(got_root("testbox", "root@testbox:~#"));
        assert!(!got_root("testbox", "$ "));
        assert!(!got_root("testbox", "lowpriv@testbox:~$"));
        assert!(!got_root("otherbox", "root@testbox:~#"));
    }

    #[test]
    fn ansi_escapes_removed() {
        assert_eq!(strip_ansi("\x1b[01;32m# \x1b[0m"), "# ");
        assert_eq!(strip_ansi("plain text"), "plain text");
    }

    #[tokio::test]
    async fn run_command_reports_goal_on_root_prompt() {
        let exec = FakeExec::with_run_output("uid=0(root) gid=0(root)\n# ");
        let cap = SshRunCommand::new(exec);
        let outcome = cap
            .execute(&[ParamValue::Str("su root".into())])
            .await;
        assert!(outcome.goal_reached);
        assert!(outcome.text.contains("uid=0"));
    }

    #[tokio::test]
    async fn run_command_plain_output_no_goal() {
        let exec = FakeExec::with_run_output("uid=1001(lowpriv)\n");
        let cap = SshRunCommand::new(exec);
        let outcome = cap.execute(&[ParamValue::Str("id".into())]).await;
        assert!(!outcome.goal_reached);
        assert_eq!(outcome.text, "uid=1001(lowpriv)\n");
    }

    #[tokio::test]
    async fn run_command_strips_echoed_capability_name() {
        struct CapturingExec(Mutex<String>);
        impl Exec for CapturingExec {
            fn hostname(&self) -> &str {
                "testbox"
            }
            fn username(&self) -> &str {
                "lowpriv"
            }
            fn run(&self, command: &str) -> ExecFuture<'_> {
                *self.0.lock().unwrap_or_else(|e| e.into_inner()) = command.to_string();
                Box::pin(async { Ok(String::new()) })
            }
            fn run_as(&self, _u: &str, _p: &str, _c: &str) -> ExecFuture<'_> {
                Box::pin(async { Err(ExecError::Other("unused".into())) })
            }
        }

        let exec = Arc::new(CapturingExec(Mutex::new(String::new())));
        let cap = SshRunCommand::new(exec.clone());
        cap.execute(&[ParamValue::Str("exec_command sudo -l".into())])
            .await;
        assert_eq!(*exec.0.lock().unwrap(), "sudo -l");
    }

    #[tokio::test]
    async fn credential_test_root_signals_goal() {
        let exec = FakeExec::with_responses(vec![Ok("root\n".into())]);
        let cap = SshTestCredential::new(exec.clone()).with_retry(fast_retry());
        let outcome = cap
            .execute(&[
                ParamValue::Str("root".into()),
                ParamValue::Str("toor".into()),
            ])
            .await;
        assert!(outcome.goal_reached);
        assert_eq!(exec.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn credential_test_non_root_no_goal() {
        let exec = FakeExec::with_responses(vec![Ok("backup\n".into())]);
        let cap = SshTestCredential::new(exec).with_retry(fast_retry());
        let outcome = cap
            .execute(&[
                ParamValue::Str("backup".into()),
                ParamValue::Str("backup".into()),
            ])
            .await;
        assert!(!outcome.goal_reached);
        assert!(outcome.text.contains("not root"));
    }

    #[tokio::test]
    async fn auth_failure_is_never_retried() {
        let exec = FakeExec::with_responses(vec![Err(ExecError::Auth("denied".into()))]);
        let cap = SshTestCredential::new(exec.clone()).with_retry(fast_retry());
        let outcome = cap
            .execute(&[
                ParamValue::Str("alice".into()),
                ParamValue::Str("wrong".into()),
            ])
            .await;
        assert!(!outcome.goal_reached);
        assert!(outcome.text.contains("credentials are wrong"));
        assert_eq!(exec.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_retried_then_succeeds() {
        // Responses pop from the back: two transient errors, then success.
        let exec = FakeExec::with_responses(vec![
            Ok("root\n".into()),
            Err(ExecError::Transient("connection reset".into())),
            Err(ExecError::Transient("connection refused".into())),
        ]);
        let cap = SshTestCredential::new(exec.clone()).with_retry(fast_retry());
        let outcome = cap
            .execute(&[
                ParamValue::Str("root".into()),
                ParamValue::Str("toor".into()),
            ])
            .await;
        assert!(outcome.goal_reached);
        assert_eq!(exec.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failure_bounded() {
        let exec = FakeExec::with_responses(vec![
            Err(ExecError::Transient("connection refused".into())),
            Err(ExecError::Transient("connection refused".into())),
            Err(ExecError::Transient("connection refused".into())),
            Err(ExecError::Transient("connection refused".into())),
            Err(ExecError::Transient("connection refused".into())),
        ]);
        let cap = SshTestCredential::new(exec.clone()).with_retry(fast_retry());
        let outcome = cap
            .execute(&[
                ParamValue::Str("root".into()),
                ParamValue::Str("toor".into()),
            ])
            .await;
        assert!(!outcome.goal_reached);
        assert!(outcome.text.contains("connection failed after"));
        // max_retries = 3 means 4 attempts total.
        assert_eq!(exec.attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn derived_schemas_declare_required_fields() {
        let exec = FakeExec::with_run_output("");
        let run_schema = SshRunCommand::new(exec.clone()).schema();
        assert_eq!(run_schema["properties"]["command"]["type"], "string");

        let cred_schema = SshTestCredential::new(exec).schema();
        let required = cred_schema["required"].as_array().unwrap();
        assert!(required.contains(&"username".into()));
        assert!(required.contains(&"password".into()));
    }

    #[test]
    fn classify_auth_vs_transient() {
        let auth = classify(ExecCapture {
            stdout: String::new(),
            stderr: "lowpriv@host: Permission denied (password).".into(),
            status: Some(255),
            timed_out: false,
        });
        assert!(matches!(auth, Err(ExecError::Auth(_))));

        let transient = classify(ExecCapture {
            stdout: String::new(),
            stderr: "ssh: connect to host 10.0.0.1 port 22: Connection refused".into(),
            status: Some(255),
            timed_out: false,
        });
        assert!(matches!(transient, Err(ExecError::Transient(_))));

        let sshpass_auth = classify(ExecCapture {
            stdout: String::new(),
            stderr: String::new(),
            status: Some(5),
            timed_out: false,
        });
        assert!(matches!(sshpass_auth, Err(ExecError::Auth(_))));
    }

    #[test]
    fn remote_permission_denied_is_normal_output() {
        // A remote command printing "Permission denied" with exit 1 is
        // command output, not an auth failure.
        let result = classify(ExecCapture {
            stdout: "cat: /etc/shadow: Permission denied\n".into(),
            stderr: String::new(),
            status: Some(1),
            timed_out: false,
        });
        assert!(matches!(result, Ok(ref s) if s.contains("Permission denied")));
    }
}
