//! Builtin function units.
//!
//! Each unit borrows its [`FunctionEnv`] for one invocation, reads positional
//! arguments from the variable store, and reports an [`Outcome`].
//! [`descriptors`] lists them for [`Registry::with_builtins`].
//!
//! | Name           | Arguments          | Effect                                   |
//! |----------------|--------------------|------------------------------------------|
//! | `UpdateStatus` | `[text]`           | push `text` to the status sink           |
//! | `Set`          | `name value`       | set a variable                           |
//! | `Unset`        | `name`             | remove a variable (`Fail` if absent)     |
//! | `Echo`         | `[words…]`         | log the words, keep them in `LastEcho`   |
//! | `AssertEqual`  | `a b`              | `Fail` unless `a == b`                   |
//! | `AssertSet`    | `name`             | `Fail` unless the variable exists        |
//! | `Fail`         | `[message]`        | always `Fail`                            |
//! | `Sleep`        | `millis`           | wait, honouring cancellation             |
//!
//! [`Registry::with_builtins`]: super::registry::Registry::with_builtins

use std::time::{Duration, Instant};

use super::function::{arg_name, ExecutionFault, FunctionEnv, Outcome, ScriptFunction};
use super::registry::Descriptor;
use super::value::FromValue;

/// Variable `UpdateStatus` mirrors the last reported status into.
pub const STATUS_VAR: &str = "Status";
/// Variable `Echo` keeps its last output in.
pub const LAST_ECHO_VAR: &str = "LastEcho";
/// Text `UpdateStatus` reports when called without an argument.
pub const STATUS_PROMPT: &str = "Enter a status message";

/// Granularity at which `Sleep` checks for cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Descriptors for every builtin unit.
pub fn descriptors() -> Vec<Descriptor> {
    vec![
        Descriptor::new(
            "UpdateStatus",
            "Update the status shown to the observing client",
            UpdateStatus::create,
        ),
        Descriptor::new("Set", "Set a variable", Set::create).min_args(2),
        Descriptor::new("Unset", "Remove a variable", Unset::create).min_args(1),
        Descriptor::new("Echo", "Log a line of text", Echo::create),
        Descriptor::new("AssertEqual", "Check that two values are equal", AssertEqual::create)
            .min_args(2),
        Descriptor::new("AssertSet", "Check that a variable is set", AssertSet::create)
            .min_args(1),
        Descriptor::new("Fail", "Fail with a message", Fail::create),
        Descriptor::new("Sleep", "Wait for a number of milliseconds", Sleep::create).min_args(1),
    ]
}

// ── UpdateStatus ──────────────────────────────────────────────────────────────

/// Forwards its argument to the run's status sink.
pub struct UpdateStatus<'a> {
    env: FunctionEnv<'a>,
}

impl UpdateStatus<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(UpdateStatus { env })
    }
}

impl ScriptFunction for UpdateStatus<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let text = self.env.arg(0, STATUS_PROMPT);
        self.env.vars.set(STATUS_VAR, text.as_str());
        self.env.ctx.status.report(&text);
        Ok(Outcome::pass())
    }
}

// ── Set / Unset ───────────────────────────────────────────────────────────────

pub struct Set<'a> {
    env: FunctionEnv<'a>,
}

impl Set<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(Set { env })
    }
}

impl ScriptFunction for Set<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let name = self.env.arg(0, "");
        if name.is_empty() {
            return Ok(Outcome::error("variable name is empty"));
        }
        let value = self.env.arg(1, "");
        self.env.vars.set(name, value);
        Ok(Outcome::pass())
    }
}

pub struct Unset<'a> {
    env: FunctionEnv<'a>,
}

impl Unset<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(Unset { env })
    }
}

impl ScriptFunction for Unset<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let name = self.env.arg(0, "");
        if self.env.vars.unset(&name) {
            Ok(Outcome::pass())
        } else {
            Ok(Outcome::fail(format!("variable `{name}` is not set")))
        }
    }
}

// ── Echo ──────────────────────────────────────────────────────────────────────

pub struct Echo<'a> {
    env: FunctionEnv<'a>,
}

impl Echo<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(Echo { env })
    }
}

impl ScriptFunction for Echo<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let line = self.env.args().join(" ");
        tracing::info!(session = %self.env.ctx.session_id, "{line}");
        self.env.vars.set(LAST_ECHO_VAR, line.as_str());
        Ok(Outcome::pass().with_message(line))
    }
}

// ── Assertions ────────────────────────────────────────────────────────────────

pub struct AssertEqual<'a> {
    env: FunctionEnv<'a>,
}

impl AssertEqual<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(AssertEqual { env })
    }
}

impl ScriptFunction for AssertEqual<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let actual = self.env.arg(0, "");
        let expected = self.env.arg(1, "");
        if actual == expected {
            Ok(Outcome::pass())
        } else {
            Ok(Outcome::fail(format!("expected `{expected}`, got `{actual}`")))
        }
    }
}

pub struct AssertSet<'a> {
    env: FunctionEnv<'a>,
}

impl AssertSet<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(AssertSet { env })
    }
}

impl ScriptFunction for AssertSet<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let name = self.env.arg(0, "");
        if self.env.vars.contains(&name) {
            Ok(Outcome::pass())
        } else {
            Ok(Outcome::fail(format!("variable `{name}` is not set")))
        }
    }
}

// ── Fail ──────────────────────────────────────────────────────────────────────

pub struct Fail<'a> {
    env: FunctionEnv<'a>,
}

impl Fail<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(Fail { env })
    }
}

impl ScriptFunction for Fail<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        Ok(Outcome::fail(self.env.arg(0, "failed")))
    }
}

// ── Sleep ─────────────────────────────────────────────────────────────────────

/// Blocks the run's thread; the orchestrator does not time steps out, so the
/// unit polls the cancel token itself.
pub struct Sleep<'a> {
    env: FunctionEnv<'a>,
}

impl Sleep<'_> {
    pub fn create(env: FunctionEnv<'_>) -> Box<dyn ScriptFunction + '_> {
        Box::new(Sleep { env })
    }
}

impl ScriptFunction for Sleep<'_> {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        let raw = self.env.arg(0, "");
        let Some(millis) = self.env.vars.get(&arg_name(0)).and_then(u64::from_value) else {
            return Ok(Outcome::error(format!("invalid duration `{raw}`")));
        };

        let deadline = Instant::now() + Duration::from_millis(millis);
        loop {
            if self.env.ctx.cancel.is_cancelled() {
                return Err(ExecutionFault::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Outcome::pass());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
