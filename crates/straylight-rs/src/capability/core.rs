//! Capability trait, registry, and dispatch.
//!
//! A [`Capability`] is a named, side-effecting action with a declarative
//! parameter list and a fixed result contract: every invocation produces a
//! [`CapabilityOutcome`] — the result text fed back into history, plus a
//! flag saying whether the run's goal was reached.
//!
//! The [`CapabilitySet`] maps names to long-lived capability instances and
//! dispatches two kinds of LLM output onto them:
//!
//! - **Free text** ([`CapabilitySet::dispatch_text`]) for plain chat models:
//!   the text is cleaned with [`cmd_output_fixer`](super::fixer::cmd_output_fixer),
//!   split on the first whitespace, and routed to the named capability — or
//!   wholesale to the default capability when the first word isn't a
//!   registered name.
//! - **Structured calls** ([`CapabilitySet::dispatch_call`]) for
//!   function-calling models: JSON arguments are validated against the
//!   capability's schema and mapped onto its parameter list.
//!
//! Malformed input is never fatal: it produces a diagnostic outcome the LLM
//! can read and self-correct from on the next turn. The registry itself
//! never retries a capability — retry policy belongs to the capability.

use crate::ToolDef;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ── Outcome ────────────────────────────────────────────────────────

/// The uniform result of a capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityOutcome {
    /// Result text — opaque transcript content for the history and the log.
    pub text: String,
    /// Whether this invocation achieved the run's goal (root shell, all
    /// flags submitted, …).
    pub goal_reached: bool,
}

impl CapabilityOutcome {
    /// An ordinary, non-terminal result.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            goal_reached: false,
        }
    }

    /// A result that signals the run's goal was reached.
    pub fn goal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            goal_reached: true,
        }
    }
}

// ── Parameters ─────────────────────────────────────────────────────

/// The type of a single capability parameter.
///
/// Free-text dispatch only supports simple scalars — anything richer cannot
/// be parsed reliably out of an untrusted LLM line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
}

/// A declared capability parameter.
///
/// Declared up front (rather than inferred from a signature at call time)
/// so registration can reject bad parameter lists before the first turn.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn str(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Str,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
        }
    }

    pub const fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
        }
    }

    pub const fn bool(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Bool,
        }
    }
}

/// A parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ── Capability trait ───────────────────────────────────────────────

/// Boxed future returned by [`Capability::execute`].
pub type CapabilityFuture<'a> = Pin<Box<dyn Future<Output = CapabilityOutcome> + Send + 'a>>;

/// A named, invocable action with a uniform result contract.
///
/// Capability instances are long-lived for a run: any mutable state (flags
/// already submitted, recorded notes) is owned by the instance itself, not
/// by the loop. The registry resolves the same name to the same instance for
/// the run's whole lifetime.
pub trait Capability: Send + Sync {
    /// The name the LLM uses to invoke this capability.
    fn name(&self) -> &str;

    /// One-line description templated into the prompt's capability block.
    fn describe(&self) -> String;

    /// Declared parameter list, in invocation order.
    fn params(&self) -> &[ParamSpec];

    /// Execute with parsed parameter values (one per declared parameter,
    /// in order). Errors are reported through the outcome text, never by
    /// panicking.
    fn execute(&self, args: &[ParamValue]) -> CapabilityFuture<'_>;

    /// JSON Schema for function-calling dispatch. The default derives an
    /// object schema from [`params()`](Self::params); override to supply a
    /// richer schema (e.g. from `schemars`).
    fn schema(&self) -> serde_json::Value {
        schema_from_params(self.params())
    }
}

/// Build an object schema from a declared parameter list.
pub fn schema_from_params(params: &[ParamSpec]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for p in params {
        let ty = match p.kind {
            ParamKind::Str => "string",
            ParamKind::Int => "integer",
            ParamKind::Float => "number",
            ParamKind::Bool => "boolean",
        };
        properties.insert(p.name.to_string(), serde_json::json!({"type": ty}));
        required.push(serde_json::Value::String(p.name.to_string()));
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ── Errors ─────────────────────────────────────────────────────────

/// Dispatch configuration errors. These are fatal: a registry that cannot
/// route free-text input must be fixed before a run starts.
#[derive(Debug)]
pub enum DispatchError {
    /// The input named no registered capability and no default is configured.
    NoDefaultCapability,
    /// A capability was registered with an invalid parameter list.
    InvalidParams { capability: String, reason: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NoDefaultCapability => {
                write!(f, "no capability matched and no default capability is set")
            }
            DispatchError::InvalidParams { capability, reason } => {
                write!(f, "capability '{capability}' has invalid parameters: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

// ── Dispatch result ────────────────────────────────────────────────

/// The record of one dispatched invocation.
#[derive(Debug)]
pub struct Dispatch {
    /// Resolved capability name (empty when parsing failed before routing).
    pub capability: String,
    /// The argument text handed to the capability.
    pub arguments: String,
    /// The capability's outcome (or a parse diagnostic).
    pub outcome: CapabilityOutcome,
    /// Wall-clock execution time.
    pub duration: Duration,
}

// ── CapabilitySet ──────────────────────────────────────────────────

/// A registry of capabilities with an optional default for free-text input.
///
/// Registration is idempotent per name: re-registering a name replaces the
/// instance, and resolving a name always yields the same instance until it
/// is replaced. Iteration order (for prompt blocks and tool definitions) is
/// the sorted name order.
pub struct CapabilitySet {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
    default_name: Option<String>,
}

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            capabilities: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a capability under `name` (or its own declared name), and
    /// optionally record it as the default for unqualified free-text input.
    ///
    /// Fails if the declared parameter list is invalid (duplicate or empty
    /// parameter names) — caught here so a bad capability aborts startup,
    /// not the first invocation.
    pub fn register(
        &mut self,
        capability: impl Capability + 'static,
        name: Option<&str>,
        default: bool,
    ) -> Result<(), DispatchError> {
        let name = name.unwrap_or(capability.name()).to_string();
        validate_params(&name, capability.params())?;
        if default {
            self.default_name = Some(name.clone());
        }
        debug!("registered capability '{name}' (default: {default})");
        self.capabilities.insert(name, Arc::new(capability));
        Ok(())
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Whether a default capability is configured.
    pub fn has_default(&self) -> bool {
        self.default_name.is_some()
    }

    /// Resolve a name to a capability, falling back to the default.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, DispatchError> {
        if let Some(cap) = self.capabilities.get(name) {
            return Ok(cap.clone());
        }
        self.default_name
            .as_deref()
            .and_then(|d| self.capabilities.get(d))
            .cloned()
            .ok_or(DispatchError::NoDefaultCapability)
    }

    /// The "You can either…" block templated into prompts.
    pub fn describe_block(&self) -> String {
        let mut out = String::from("You can either\n");
        for (name, cap) in &self.capabilities {
            out.push_str("\n- `");
            out.push_str(name);
            for p in cap.params() {
                out.push(' ');
                out.push_str(p.name);
            }
            out.push_str("`: ");
            out.push_str(&cap.describe());
        }
        out
    }

    /// Tool definitions for function-calling backends.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.capabilities
            .iter()
            .map(|(name, cap)| ToolDef::new(name.clone(), cap.describe(), cap.schema()))
            .collect()
    }

    /// Dispatch a free-text command from a non-function-calling model.
    ///
    /// The text is cleaned (wrapping quotes/backticks, code fences, `$ `
    /// prefix), split on the first whitespace, and routed to the named
    /// capability if one matches — otherwise the entire cleaned text goes to
    /// the default capability as its argument line.
    ///
    /// Parameter parse failures come back as a diagnostic outcome, never an
    /// error. The only error is a missing default for unrecognized input.
    pub async fn dispatch_text(&self, raw: &str) -> Result<Dispatch, DispatchError> {
        let cleaned = super::fixer::cmd_output_fixer(raw);

        let (candidate, rest) = match cleaned.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail),
            None => (cleaned.as_str(), ""),
        };

        let (cap, args_text) = if let Some(cap) = self.capabilities.get(candidate) {
            (cap.clone(), rest.to_string())
        } else {
            // Unqualified input: the whole cleaned text is the argument line.
            let cap = self
                .default_name
                .as_deref()
                .and_then(|d| self.capabilities.get(d))
                .ok_or(DispatchError::NoDefaultCapability)?;
            (cap.clone(), cleaned.clone())
        };

        info!("dispatching '{}' args: {}", cap.name(), preview(&args_text));
        let start = Instant::now();
        let outcome = match parse_args(cap.params(), &args_text) {
            Ok(values) => cap.execute(&values).await,
            Err(diagnostic) => CapabilityOutcome::ok(diagnostic),
        };

        Ok(Dispatch {
            capability: cap.name().to_string(),
            arguments: args_text,
            outcome,
            duration: start.elapsed(),
        })
    }

    /// Dispatch a structured tool call from a function-calling model.
    ///
    /// JSON arguments are validated against the capability's schema and then
    /// mapped onto the declared parameter list. Validation failures come back
    /// as a diagnostic outcome so the model can self-correct.
    pub async fn dispatch_call(
        &self,
        name: &str,
        json_args: &str,
    ) -> Result<Dispatch, DispatchError> {
        let cap = self.resolve(name)?;

        info!("dispatching call '{}' args: {}", cap.name(), preview(json_args));
        let start = Instant::now();
        let outcome = match parse_json_args(cap.as_ref(), json_args) {
            Ok(values) => cap.execute(&values).await,
            Err(diagnostic) => CapabilityOutcome::ok(diagnostic),
        };

        Ok(Dispatch {
            capability: cap.name().to_string(),
            arguments: json_args.to_string(),
            outcome,
            duration: start.elapsed(),
        })
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .field("default", &self.default_name)
            .finish()
    }
}

// ── Parsing helpers ────────────────────────────────────────────────

fn validate_params(name: &str, params: &[ParamSpec]) -> Result<(), DispatchError> {
    let mut seen = std::collections::HashSet::new();
    for p in params {
        if p.name.is_empty() {
            return Err(DispatchError::InvalidParams {
                capability: name.to_string(),
                reason: "empty parameter name".to_string(),
            });
        }
        if !seen.insert(p.name) {
            return Err(DispatchError::InvalidParams {
                capability: name.to_string(),
                reason: format!("duplicate parameter '{}'", p.name),
            });
        }
    }
    Ok(())
}

/// Split an argument line into declared parameters: the first n-1 parameters
/// take one whitespace-delimited word each, the last one takes the remainder.
///
/// Returns a human-readable diagnostic on mismatch — fed back into history
/// so the LLM can correct itself.
fn parse_args(params: &[ParamSpec], text: &str) -> Result<Vec<ParamValue>, String> {
    if params.is_empty() {
        return if text.trim().is_empty() {
            Ok(Vec::new())
        } else {
            Err(format!("invalid number of parameters: expected none, got '{text}'"))
        };
    }

    let parts: Vec<&str> = text.splitn(params.len(), char::is_whitespace).collect();
    if parts.len() != params.len() {
        return Err(format!(
            "invalid number of parameters: expected {} ({}), got {}",
            params.len(),
            params.iter().map(|p| p.name).collect::<Vec<_>>().join(" "),
            parts.len(),
        ));
    }

    params
        .iter()
        .zip(parts)
        .map(|(spec, part)| parse_value(spec, part))
        .collect()
}

/// Map validated JSON object arguments onto the declared parameter list.
fn parse_json_args(cap: &dyn Capability, json_args: &str) -> Result<Vec<ParamValue>, String> {
    let value: serde_json::Value = serde_json::from_str(json_args)
        .map_err(|e| format!("invalid JSON arguments: {e}"))?;

    let schema = cap.schema();
    if let Ok(validator) = jsonschema::validator_for(&schema) {
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!(
                "argument validation failed for '{}':\n{}",
                cap.name(),
                errors.join("\n")
            ));
        }
    }

    cap.params()
        .iter()
        .map(|spec| {
            let field = value
                .get(spec.name)
                .ok_or_else(|| format!("missing parameter '{}'", spec.name))?;
            let rendered = match field {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parse_value(spec, &rendered)
        })
        .collect()
}

fn parse_value(spec: &ParamSpec, part: &str) -> Result<ParamValue, String> {
    match spec.kind {
        ParamKind::Str => Ok(ParamValue::Str(part.to_string())),
        ParamKind::Int => part
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|e| format!("could not parse parameter '{}': {e}", spec.name)),
        ParamKind::Float => part
            .parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|e| format!("could not parse parameter '{}': {e}", spec.name)),
        ParamKind::Bool => part
            .parse::<bool>()
            .map(ParamValue::Bool)
            .map_err(|e| format!("could not parse parameter '{}': {e}", spec.name)),
    }
}

fn preview(s: &str) -> String {
    let p: String = s.chars().take(120).collect();
    if s.len() > p.len() { format!("{p}...") } else { p }
}

// ── Tests ──────────────────────────────────────────────────────────
