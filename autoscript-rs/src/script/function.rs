//! The function contract.
//!
//! Every executable unit implements [`ScriptFunction`].  A unit is built by
//! its registered factory from a [`FunctionEnv`], which lends it the run's
//! [`VarStore`] and [`RunContext`] for the duration of one invocation, and
//! then executed exactly once.
//!
//! Arguments are passed through the store under positional names
//! (`Argument0`, `Argument1`, …, see [`arg_name`]) with the count in
//! [`ARGUMENT_COUNT`].  Units read them with the forgiving accessors and
//! decide for themselves whether a missing argument is an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::status::{NullStatus, StatusSink};
use crate::var::VarStore;

/// Variable holding the number of positional arguments of the current step.
pub const ARGUMENT_COUNT: &str = "ArgumentCount";

/// Conventional variable name of positional argument `i`.
pub fn arg_name(i: usize) -> String {
    format!("Argument{i}")
}

// ── Status / results ──────────────────────────────────────────────────────────

/// Outcome class of one step.
///
/// `Fail` is an expected negative outcome; `Error` is a fault (unknown
/// function, bad arguments, a unit that blew up); `Skipped` marks a step that
/// never ran because the run aborted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl Status {
    /// Rank used to pick a run's verdict: `Error > Fail > Skipped > Pass`.
    pub fn severity(self) -> u8 {
        match self {
            Status::Pass => 0,
            Status::Skipped => 1,
            Status::Fail => 2,
            Status::Error => 3,
        }
    }

    pub fn is_pass(self) -> bool {
        self == Status::Pass
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
            Status::Skipped => "SKIPPED",
        };
        f.pad(s)
    }
}

/// What a unit reports back from [`ScriptFunction::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: Status,
    pub message: Option<String>,
}

impl Outcome {
    pub fn pass() -> Self {
        Self { status: Status::Pass, message: None }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { status: Status::Fail, message: Some(message.into()) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: Status::Error, message: Some(message.into()) }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// The recorded result of one script step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub function_name: String,
    pub function_description: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepResult {
    pub fn new(name: &str, description: &str, outcome: Outcome) -> Self {
        Self {
            function_name: name.to_owned(),
            function_description: description.to_owned(),
            status: outcome.status,
            message: outcome.message,
        }
    }
}

/// A fault raised from inside a unit.  The orchestrator records it as an
/// `Error` result naming the unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFault {
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

impl ExecutionFault {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

// ── Run context ───────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the owning session can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Caller-supplied context handed to every unit of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifies the invoking session in logs.
    pub session_id: String,
    /// Where `UpdateStatus` pushes its text.
    pub status: Arc<dyn StatusSink>,
    /// Checked by the orchestrator between steps and by long-running units.
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(session_id: impl Into<String>, status: Arc<dyn StatusSink>) -> Self {
        Self { session_id: session_id.into(), status, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("default", Arc::new(NullStatus))
    }
}

// ── Contract ──────────────────────────────────────────────────────────────────

/// Borrowed environment a unit is constructed from.
pub struct FunctionEnv<'a> {
    pub vars: &'a mut VarStore,
    pub ctx: &'a RunContext,
}

impl FunctionEnv<'_> {
    /// Positional argument `i` as text, or `default`.
    pub fn arg(&self, i: usize, default: &str) -> String {
        self.vars.read_string(&arg_name(i), default)
    }

    /// Number of positional arguments bound for this step.
    pub fn arg_count(&self) -> usize {
        self.vars.read_typed(ARGUMENT_COUNT, 0u64) as usize
    }

    /// All positional arguments, in order.
    pub fn args(&self) -> Vec<String> {
        (0..self.arg_count()).map(|i| self.arg(i, "")).collect()
    }
}

/// An executable unit.
pub trait ScriptFunction {
    /// Run the unit once.
    ///
    /// Expected negative outcomes are `Ok` with a `Fail` or `Error` status;
    /// `Err` is for faults the unit could not handle itself.
    fn execute(&mut self) -> Result<Outcome, ExecutionFault>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
