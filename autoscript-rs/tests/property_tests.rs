use std::collections::HashSet;

use proptest::prelude::*;

use autoscript::script::function::{ExecutionFault, FunctionEnv, Outcome, ScriptFunction};
use autoscript::script::lexer::tokenize;
use autoscript::script::{
    parse_script, Descriptor, FailurePolicy, Orchestrator, Registry, RunContext, RunState, Status,
};
use autoscript::var::VarStore;

struct Noop;

impl ScriptFunction for Noop {
    fn execute(&mut self) -> Result<Outcome, ExecutionFault> {
        Ok(Outcome::pass())
    }
}

fn noop<'a>(_env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
    Box::new(Noop)
}

/// One script line per step kind: 0 passes, 1 fails, 2 names no function.
fn step_line(kind: u8) -> &'static str {
    match kind {
        0 => "Echo ok",
        1 => "Fail nope",
        _ => "Missing thing",
    }
}

proptest! {
    /// Concatenated lexemes reproduce any input that lexes.
    #[test]
    fn lexemes_reproduce_source(s in "[ -~\t\r\n]{0,80}") {
        if let Ok(tokens) = tokenize(&s) {
            let joined: String = tokens.iter().map(|t| t.lexeme).collect();
            prop_assert_eq!(joined, s);
        }
    }

    /// Lexing and parsing return Ok or Err on arbitrary text; they never panic.
    #[test]
    fn lexer_and_parser_do_not_panic(s in "\\PC*") {
        let _ = tokenize(&s);
        let _ = parse_script(&s);
    }

    /// Positions increase strictly and tile the input.
    #[test]
    fn token_positions_are_contiguous(s in "[a-z0-9 $.\"\n]{0,60}") {
        if let Ok(tokens) = tokenize(&s) {
            let mut expected = 0;
            for t in &tokens {
                prop_assert_eq!(t.position, expected);
                expected += t.lexeme.len();
            }
            prop_assert_eq!(expected, s.len());
        }
    }

    /// An empty store returns the caller's default for every name.
    #[test]
    fn empty_store_returns_default(name in "[A-Za-z_][A-Za-z0-9_]{0,12}", d in "\\PC{0,12}", n in any::<i64>()) {
        let vars = VarStore::new();
        prop_assert_eq!(vars.read_string(&name, &d), d);
        prop_assert_eq!(vars.read_typed::<i64>(&name, n), n);
    }

    /// Writing then reading a name returns what was written.
    #[test]
    fn set_then_read(name in "[A-Za-z_][A-Za-z0-9_]{0,12}", v in "\\PC{0,20}") {
        let mut vars = VarStore::new();
        vars.set(name.clone(), v.clone());
        prop_assert_eq!(vars.read_string(&name, "unused"), v);
    }

    /// A registry never holds two descriptors with the same name.
    #[test]
    fn registry_names_unique(names in prop::collection::vec("[A-C][a-c]{0,2}", 0..20)) {
        let mut reg = Registry::new();
        let mut accepted = 0;
        for n in &names {
            if reg.register(Descriptor::new(n.clone(), "", noop)).is_ok() {
                accepted += 1;
            }
        }
        let distinct: HashSet<_> = names.iter().collect();
        prop_assert_eq!(accepted, distinct.len());
        prop_assert_eq!(reg.len(), distinct.len());
    }

    /// Abort: one result per step; everything after the first non-pass is
    /// `Skipped`.
    #[test]
    fn abort_skips_after_first_failure(kinds in prop::collection::vec(0u8..3, 0..12)) {
        let reg = Registry::with_builtins().unwrap();
        let src: Vec<_> = kinds.iter().map(|&k| step_line(k)).collect();
        let mut vars = VarStore::new();
        let out = Orchestrator::new(&reg)
            .run(&src.join("\n"), &mut vars, &RunContext::default())
            .unwrap();

        prop_assert_eq!(out.results.len(), kinds.len());
        match kinds.iter().position(|&k| k != 0) {
            None => {
                prop_assert!(out.results.iter().all(|r| r.status == Status::Pass));
                prop_assert_eq!(out.state, RunState::Completed);
            }
            Some(first) => {
                prop_assert!(out.results[..first].iter().all(|r| r.status == Status::Pass));
                prop_assert_ne!(out.results[first].status, Status::Pass);
                prop_assert!(out.results[first + 1..].iter().all(|r| r.status == Status::Skipped));
                prop_assert_eq!(out.state, RunState::Aborted);
            }
        }
    }

    /// Continue: every step runs and the verdict is the most severe status.
    #[test]
    fn continue_runs_everything(kinds in prop::collection::vec(0u8..3, 0..12)) {
        let reg = Registry::with_builtins().unwrap();
        let src: Vec<_> = kinds.iter().map(|&k| step_line(k)).collect();
        let mut vars = VarStore::new();
        let out = Orchestrator::new(&reg)
            .with_policy(FailurePolicy::Continue)
            .run(&src.join("\n"), &mut vars, &RunContext::default())
            .unwrap();

        prop_assert_eq!(out.results.len(), kinds.len());
        prop_assert!(out.results.iter().all(|r| r.status != Status::Skipped));
        let expected = if kinds.contains(&2) {
            Status::Error
        } else if kinds.contains(&1) {
            Status::Fail
        } else {
            Status::Pass
        };
        prop_assert_eq!(out.verdict, expected);
        prop_assert_eq!(out.state, RunState::Completed);
    }
}
