//! The script engine.
//!
//! Script text is lexed ([`lexer`]), grouped into invocations ([`parse`]),
//! and run by the [`Orchestrator`] against a [`VarStore`](crate::var::VarStore).
//! Each invocation names a unit registered in a [`Registry`]; units implement
//! the [`ScriptFunction`] contract and report a [`StepResult`].
//!
//! # Quick start
//!
//! ```rust
//! use autoscript::script::{Orchestrator, Registry, RunContext, Status};
//! use autoscript::var::VarStore;
//!
//! let registry = Registry::with_builtins().unwrap();
//! let mut vars = VarStore::new();
//! let outcome = Orchestrator::new(&registry)
//!     .run("Set x 42\nAssertEqual $x 42", &mut vars, &RunContext::default())
//!     .unwrap();
//! assert_eq!(outcome.verdict, Status::Pass);
//! ```

pub mod builtins;
pub mod function;
pub mod lexer;
pub mod orchestrator;
pub mod parse;
pub mod registry;
pub mod value;

// Re-exports for convenience.
pub use function::{
    CancelToken, ExecutionFault, FunctionEnv, Outcome, RunContext, ScriptFunction, Status,
    StepResult,
};
pub use lexer::{tokenize, LexError, Lexer, Token, TokenKind};
pub use orchestrator::{FailurePolicy, Orchestrator, RunOutcome, RunState};
pub use parse::{parse_script, Invocation, ParseError};
pub use registry::{Descriptor, Registry, RegistryError};
pub use value::Value;
