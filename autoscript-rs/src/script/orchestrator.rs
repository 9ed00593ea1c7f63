//! Script orchestrator.
//!
//! The [`Orchestrator`] drives one script run through
//!
//! ```text
//! Idle → Parsing → (Resolving → Executing → Recording)* → Completed | Aborted
//! ```
//!
//! Steps run strictly in order against a single [`VarStore`]; later steps see
//! what earlier ones wrote.  Each step's outcome is recorded as a
//! [`StepResult`].  Under [`FailurePolicy::Abort`] the first non-`Pass`
//! result stops the run and every remaining step is recorded as `Skipped`;
//! under [`FailurePolicy::Continue`] everything is attempted.
//!
//! Faults inside a unit (an `Err` from `execute`, or a panic in the factory or
//! in `execute`) are caught here and recorded as `Error` results, so one bad
//! unit never takes the run down with it.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;

use serde::Serialize;

use super::function::{
    arg_name, ExecutionFault, FunctionEnv, Outcome, RunContext, Status, StepResult, ARGUMENT_COUNT,
};
use super::parse::{parse_script, Invocation, ParseError};
use super::registry::{Descriptor, Registry};
use crate::var::VarStore;

// ── Policy / state ────────────────────────────────────────────────────────────

/// What to do after a step that did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FailurePolicy {
    /// Stop; record the remaining steps as `Skipped`.
    #[default]
    Abort,
    /// Keep going and attempt every step ("run everything and report").
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!("unknown failure policy `{other}` (expected abort or continue)")),
        }
    }
}

/// Orchestrator state.  A finished run is `Completed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Parsing,
    Resolving,
    Executing,
    Recording,
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── RunOutcome ────────────────────────────────────────────────────────────────

/// Every step's result, in script order, plus the aggregate verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub results: Vec<StepResult>,
    pub verdict: Status,
    pub state: RunState,
}

impl RunOutcome {
    fn new(results: Vec<StepResult>, state: RunState) -> Self {
        let verdict = verdict_of(&results);
        Self { results, verdict, state }
    }

    /// Statuses of all steps, in order.
    pub fn statuses(&self) -> Vec<Status> {
        self.results.iter().map(|r| r.status).collect()
    }

    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }
}

/// `Pass` if every result passed (or there are none); otherwise the most
/// severe status present.
pub fn verdict_of(results: &[StepResult]) -> Status {
    results
        .iter()
        .map(|r| r.status)
        .max_by_key(|s| s.severity())
        .unwrap_or(Status::Pass)
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Runs scripts against a shared [`Registry`].
#[derive(Debug, Clone, Copy)]
pub struct Orchestrator<'r> {
    registry: &'r Registry,
    policy: FailurePolicy,
}

impl<'r> Orchestrator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry, policy: FailurePolicy::default() }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parse and run `src`.  A parse error aborts before any step executes.
    pub fn run(
        &self,
        src: &str,
        vars: &mut VarStore,
        ctx: &RunContext,
    ) -> Result<RunOutcome, ParseError> {
        let mut state = RunState::Idle;
        transition(&mut state, RunState::Parsing, ctx);
        let invocations = parse_script(src).inspect_err(|e| {
            tracing::warn!(session = %ctx.session_id, "parse failed: {e}");
        })?;
        Ok(self.execute_from(state, &invocations, vars, ctx))
    }

    /// Run already-parsed invocations.
    pub fn execute(
        &self,
        invocations: &[Invocation],
        vars: &mut VarStore,
        ctx: &RunContext,
    ) -> RunOutcome {
        self.execute_from(RunState::Idle, invocations, vars, ctx)
    }

    fn execute_from(
        &self,
        mut state: RunState,
        invocations: &[Invocation],
        vars: &mut VarStore,
        ctx: &RunContext,
    ) -> RunOutcome {
        let mut results = Vec::with_capacity(invocations.len());
        let mut bound = vars.read_typed(ARGUMENT_COUNT, 0u64) as usize;

        for inv in invocations {
            if state == RunState::Aborted {
                results.push(self.skipped(inv));
                continue;
            }

            let cancelled = ctx.cancel.is_cancelled();
            let result = if cancelled {
                StepResult::new(&inv.function_name, self.description_of(inv), Outcome::error("cancelled"))
            } else {
                self.step(inv, vars, ctx, &mut bound, &mut state)
            };

            transition(&mut state, RunState::Recording, ctx);
            tracing::debug!(
                session = %ctx.session_id,
                line = inv.line,
                function = %result.function_name,
                status = %result.status,
                "step finished"
            );
            // A unit may observe the token mid-step; stop there too.
            let cancelled = cancelled || ctx.cancel.is_cancelled();
            let stop = cancelled || (self.policy == FailurePolicy::Abort && !result.status.is_pass());
            results.push(result);
            if stop {
                transition(&mut state, RunState::Aborted, ctx);
            }
        }

        if state != RunState::Aborted {
            transition(&mut state, RunState::Completed, ctx);
        }
        RunOutcome::new(results, state)
    }

    /// Resolve, bind and execute one invocation.
    fn step(
        &self,
        inv: &Invocation,
        vars: &mut VarStore,
        ctx: &RunContext,
        bound: &mut usize,
        state: &mut RunState,
    ) -> StepResult {
        transition(state, RunState::Resolving, ctx);
        let desc = match self.registry.resolve(&inv.function_name) {
            Ok(desc) => desc,
            Err(e) => {
                tracing::warn!(session = %ctx.session_id, line = inv.line, "{e}");
                return StepResult::new(&inv.function_name, "", Outcome::error(e.to_string()));
            }
        };

        if inv.arguments.len() < desc.min_args {
            let msg = format!(
                "expects at least {} argument(s), got {}",
                desc.min_args,
                inv.arguments.len()
            );
            return StepResult::new(&desc.name, &desc.description, Outcome::error(msg));
        }

        bind_arguments(inv, vars, bound);
        transition(state, RunState::Executing, ctx);
        let outcome = execute_guarded(desc, vars, ctx);
        StepResult::new(&desc.name, &desc.description, outcome)
    }

    fn description_of(&self, inv: &Invocation) -> &str {
        self.registry
            .resolve(&inv.function_name)
            .map(|d| d.description.as_str())
            .unwrap_or("")
    }

    fn skipped(&self, inv: &Invocation) -> StepResult {
        StepResult::new(
            &inv.function_name,
            self.description_of(inv),
            Outcome { status: Status::Skipped, message: None },
        )
    }
}

fn transition(state: &mut RunState, next: RunState, ctx: &RunContext) {
    tracing::trace!(session = %ctx.session_id, from = %state, to = %next, "orchestrator state");
    *state = next;
}

/// Write `Argument0..N-1` and `ArgumentCount` for `inv`, dropping positional
/// variables left over from a previous step with more arguments.
///
/// Substitution reads the store before anything is overwritten, so
/// `Echo $Argument0` sees the previous step's argument.
fn bind_arguments(inv: &Invocation, vars: &mut VarStore, bound: &mut usize) {
    let bindings = inv.bindings(vars);
    for stale in bindings.len()..*bound {
        vars.unset(&arg_name(stale));
    }
    *bound = bindings.len();
    vars.set(ARGUMENT_COUNT, bindings.len() as i64);
    vars.extend(bindings);
}

/// Build and run the unit, turning faults and panics into `Error` outcomes.
fn execute_guarded(desc: &Descriptor, vars: &mut VarStore, ctx: &RunContext) -> Outcome {
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut unit = desc.instantiate(FunctionEnv { vars, ctx });
        unit.execute()
    }));

    match run {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(ExecutionFault::Cancelled)) => Outcome::error("cancelled"),
        Ok(Err(fault)) => {
            tracing::warn!(session = %ctx.session_id, function = %desc.name, "fault: {fault}");
            Outcome::error(format!("`{}` faulted: {fault}", desc.name))
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::warn!(session = %ctx.session_id, function = %desc.name, "panicked: {msg}");
            Outcome::error(format!("`{}` panicked: {msg}", desc.name))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::script::function::ScriptFunction;
    use crate::status::RecordingStatus;

    struct Fixed<'a> {
        env: FunctionEnv<'a>,
        status: Status,
    }

    impl ScriptFunction for Fixed<'_> {
        fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
            let calls = self.env.vars.read_typed("calls", 0i64);
            self.env.vars.set("calls", calls + 1);
            Ok(Outcome { status: self.status, message: None })
        }
    }

    fn pass<'a>(env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
        Box::new(Fixed { env, status: Status::Pass })
    }

    fn fail<'a>(env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
        Box::new(Fixed { env, status: Status::Fail })
    }

    struct Faulty;

    impl ScriptFunction for Faulty {
        fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
            Err(ExecutionFault::failed("device unplugged"))
        }
    }

    fn faulty<'a>(_env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
        Box::new(Faulty)
    }

    struct Panicky;

    impl ScriptFunction for Panicky {
        fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
            panic!("boom")
        }
    }

    fn panicky<'a>(_env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
        Box::new(Panicky)
    }

    fn registry() -> Registry {
        let mut reg = Registry::with_builtins().unwrap();
        reg.register(Descriptor::new("Ok", "always passes", pass)).unwrap();
        reg.register(Descriptor::new("No", "always fails", fail)).unwrap();
        reg.register(Descriptor::new("Faulty", "returns a fault", faulty)).unwrap();
        reg.register(Descriptor::new("Panicky", "panics", panicky)).unwrap();
        reg
    }

    fn run(policy: FailurePolicy, src: &str) -> (RunOutcome, VarStore) {
        let reg = registry();
        let mut vars = VarStore::new();
        let out = Orchestrator::new(&reg)
            .with_policy(policy)
            .run(src, &mut vars, &RunContext::default())
            .unwrap();
        (out, vars)
    }

    #[test]
    fn empty_script_passes() {
        let (out, _) = run(FailurePolicy::Abort, "");
        assert!(out.results.is_empty());
        assert_eq!(out.verdict, Status::Pass);
        assert_eq!(out.state, RunState::Completed);
    }

    #[test]
    fn unregistered_function_is_error() {
        let (out, _) = run(FailurePolicy::Abort, "unregistered_fn");
        assert_eq!(out.statuses(), vec![Status::Error]);
        assert_eq!(out.verdict, Status::Error);
        assert_eq!(out.results[0].function_name, "unregistered_fn");
        assert_eq!(out.results[0].message.as_deref(), Some("unknown function `unregistered_fn`"));
    }

    #[test]
    fn abort_policy_skips_rest() {
        let (out, vars) = run(FailurePolicy::Abort, "Ok\nNo\nOk\n");
        assert_eq!(out.statuses(), vec![Status::Pass, Status::Fail, Status::Skipped]);
        assert_eq!(out.verdict, Status::Fail);
        assert_eq!(out.state, RunState::Aborted);
        assert_eq!(vars.read_typed("calls", 0i64), 2);
        assert_eq!(out.results[2].function_description, "always passes");
    }

    #[test]
    fn continue_policy_runs_everything() {
        let (out, vars) = run(FailurePolicy::Continue, "Ok\nNo\nOk\n");
        assert_eq!(out.statuses(), vec![Status::Pass, Status::Fail, Status::Pass]);
        assert_eq!(out.verdict, Status::Fail);
        assert_eq!(out.state, RunState::Completed);
        assert_eq!(vars.read_typed("calls", 0i64), 3);
    }

    #[test]
    fn error_outranks_fail() {
        let (out, _) = run(FailurePolicy::Continue, "No\nnope\nOk");
        assert_eq!(out.verdict, Status::Error);
    }

    #[test]
    fn fault_becomes_error_result() {
        let (out, _) = run(FailurePolicy::Continue, "Faulty\nOk");
        assert_eq!(out.statuses(), vec![Status::Error, Status::Pass]);
        assert_eq!(
            out.results[0].message.as_deref(),
            Some("`Faulty` faulted: device unplugged")
        );
    }

    #[test]
    fn panic_is_contained() {
        let (out, _) = run(FailurePolicy::Abort, "Panicky\nOk");
        assert_eq!(out.statuses(), vec![Status::Error, Status::Skipped]);
        assert_eq!(out.results[0].message.as_deref(), Some("`Panicky` panicked: boom"));
    }

    #[test]
    fn arguments_bound_before_execution() {
        let (out, vars) = run(FailurePolicy::Abort, "Set greeting \"hi there\"\nEcho $greeting x");
        assert!(out.is_pass());
        assert_eq!(vars.read_string("greeting", ""), "hi there");
        assert_eq!(vars.read_string("LastEcho", ""), "hi there x");
    }

    #[test]
    fn stale_positional_arguments_are_cleared() {
        let (_, vars) = run(FailurePolicy::Abort, "Echo a b c\nEcho d");
        assert_eq!(vars.read_string("Argument0", ""), "d");
        assert!(!vars.contains("Argument1"));
        assert!(!vars.contains("Argument2"));
        assert_eq!(vars.read_typed(ARGUMENT_COUNT, 0i64), 1);
    }

    #[test]
    fn substitution_sees_previous_arguments() {
        let (_, vars) = run(FailurePolicy::Abort, "Echo first\nEcho $Argument0 second");
        assert_eq!(vars.read_string("LastEcho", ""), "first second");
    }

    #[test]
    fn undefined_variable_passes_name() {
        let (_, vars) = run(FailurePolicy::Abort, "Echo $nobody");
        assert_eq!(vars.read_string("LastEcho", ""), "nobody");
    }

    #[test]
    fn too_few_arguments_is_error() {
        let (out, vars) = run(FailurePolicy::Abort, "Set onlyname");
        assert_eq!(out.statuses(), vec![Status::Error]);
        assert_eq!(
            out.results[0].message.as_deref(),
            Some("expects at least 2 argument(s), got 1")
        );
        assert!(!vars.contains("onlyname"));
    }

    #[test]
    fn extra_arguments_are_allowed() {
        let (out, _) = run(FailurePolicy::Abort, "AssertEqual a a trailing words");
        assert!(out.is_pass());
    }

    #[test]
    fn parse_error_runs_nothing() {
        let reg = registry();
        let mut vars = VarStore::new();
        let err = Orchestrator::new(&reg)
            .run("Ok\nOk \"unterminated", &mut vars, &RunContext::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::Lex(_)));
        assert!(!vars.contains("calls"));
    }

    #[test]
    fn cancelled_run_aborts_regardless_of_policy() {
        let reg = registry();
        let mut vars = VarStore::new();
        let ctx = RunContext::default();
        ctx.cancel.cancel();
        let out = Orchestrator::new(&reg)
            .with_policy(FailurePolicy::Continue)
            .run("Ok\nOk", &mut vars, &ctx)
            .unwrap();
        assert_eq!(out.statuses(), vec![Status::Error, Status::Skipped]);
        assert_eq!(out.results[0].message.as_deref(), Some("cancelled"));
        assert_eq!(out.state, RunState::Aborted);
    }

    #[test]
    fn status_unit_reaches_sink() {
        let reg = registry();
        let sink = Arc::new(RecordingStatus::new());
        let ctx = RunContext::new("s1", sink.clone());
        let mut vars = VarStore::new();
        let out = Orchestrator::new(&reg)
            .run("UpdateStatus \"Update String\"", &mut vars, &ctx)
            .unwrap();
        assert_eq!(out.statuses(), vec![Status::Pass]);
        assert_eq!(sink.history(), vec!["Update String"]);
    }

    /// Log sink for inspecting traced transitions.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn field<'l>(line: &'l str, key: &str) -> Option<&'l str> {
        let rest = &line[line.find(key)? + key.len()..];
        rest.split_whitespace().next()
    }

    #[test]
    fn traced_transitions_form_one_chain() {
        let buf = Captured::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let reg = registry();
        let mut vars = VarStore::new();
        tracing::subscriber::with_default(subscriber, || {
            Orchestrator::new(&reg).run("Ok", &mut vars, &RunContext::default()).unwrap();
        });

        let log = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let chain: Vec<(&str, &str)> = log
            .lines()
            .filter(|l| l.contains("orchestrator state"))
            .filter_map(|l| Some((field(l, "from=")?, field(l, "to=")?)))
            .collect();
        assert_eq!(
            chain,
            vec![
                ("Idle", "Parsing"),
                ("Parsing", "Resolving"),
                ("Resolving", "Executing"),
                ("Executing", "Recording"),
                ("Recording", "Completed"),
            ],
            "{log}"
        );
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("Continue".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert_eq!("abort".parse::<FailurePolicy>(), Ok(FailurePolicy::Abort));
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn outcome_serializes() {
        let (out, _) = run(FailurePolicy::Abort, "No");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["verdict"], "Fail");
        assert_eq!(json["state"], "Aborted");
        assert_eq!(json["results"][0]["function_name"], "No");
    }
}
