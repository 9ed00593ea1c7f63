//! Script-level parser: tokens → [`Invocation`]s.
//!
//! A script is a sequence of lines.  Each non-blank line is one invocation:
//!
//! ```text
//! FunctionName arg1 "quoted arg" $variable prefix$variable -5
//! ```
//!
//! - The first token on the line must be a word: the function name.
//! - Arguments are separated by white space.  Adjacent tokens with no white
//!   space between them form one argument (`file.txt`, `-5`, `"a"$b`).
//! - `$name` parts are kept symbolic and substituted when the step is about to
//!   run, so earlier steps can set variables later steps read.
//! - Blank and whitespace-only lines are ignored; so are lines starting with
//!   `#`.

use thiserror::Error;

use super::function::arg_name;
use super::lexer::{line_col, LexError, Lexer, Token, TokenKind};
use crate::var::VarStore;

// ── Invocation ────────────────────────────────────────────────────────────────

/// One piece of an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgPart {
    Literal(String),
    /// Name of a variable, substituted at bind time.
    Variable(String),
}

/// One positional argument: parts concatenated after substitution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Argument {
    pub parts: Vec<ArgPart>,
}

impl Argument {
    fn push(&mut self, part: ArgPart) {
        // Merge neighbouring literals so `file.txt` is a single part.
        if let (ArgPart::Literal(new), Some(ArgPart::Literal(last))) = (&part, self.parts.last_mut()) {
            last.push_str(new);
            return;
        }
        self.parts.push(part);
    }

    /// Resolve against `vars`.  An undefined variable contributes its bare
    /// name.
    pub fn resolve(&self, vars: &VarStore) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                ArgPart::Literal(s) => out.push_str(s),
                ArgPart::Variable(name) => match vars.get(name) {
                    Some(v) => out.push_str(&v.as_str()),
                    None => out.push_str(name),
                },
            }
        }
        out
    }
}

/// One parsed script step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub function_name: String,
    pub arguments: Vec<Argument>,
    /// 1-based source line.
    pub line: usize,
    /// Byte offset of the function name.
    pub position: usize,
}

impl Invocation {
    /// `Argument0..N-1` bindings with variables substituted from `vars`.
    pub fn bindings(&self, vars: &VarStore) -> Vec<(String, String)> {
        self.arguments
            .iter()
            .enumerate()
            .map(|(i, a)| (arg_name(i), a.resolve(vars)))
            .collect()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A failure to turn script text into invocations.  Nothing executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("expected a function name at line {line}, column {column}, found {kind} `{found}`")]
    ExpectedFunctionName {
        found: String,
        kind: TokenKind,
        line: usize,
        column: usize,
    },
    #[error("function name `{name}` must be followed by white space (line {line}, column {column})")]
    MalformedName {
        name: String,
        line: usize,
        column: usize,
    },
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse a whole script.
pub fn parse_script(src: &str) -> Result<Vec<Invocation>, ParseError> {
    let mut out = Vec::new();
    let mut line_toks: Vec<Token<'_>> = Vec::new();
    let mut line = 1;

    for tok in Lexer::new(src) {
        let tok = tok?;
        if tok.ends_line() {
            if let Some(inv) = parse_line(src, &line_toks, line)? {
                out.push(inv);
            }
            line_toks.clear();
            line += 1;
        } else {
            line_toks.push(tok);
        }
    }
    Ok(out)
}

/// Parse the tokens of one line (terminator excluded).
fn parse_line(src: &str, toks: &[Token<'_>], line: usize) -> Result<Option<Invocation>, ParseError> {
    let mut rest = toks.iter().skip_while(|t| t.kind == TokenKind::WhiteSpace).peekable();

    let Some(head) = rest.next() else { return Ok(None) };
    match head.kind {
        TokenKind::Word => {}
        TokenKind::Symbol if head.text == "#" => return Ok(None),
        kind => {
            let (_, column) = line_col(src, head.position);
            return Err(ParseError::ExpectedFunctionName {
                found: head.lexeme.to_owned(),
                kind,
                line,
                column,
            });
        }
    }

    if rest.peek().is_some_and(|t| t.kind != TokenKind::WhiteSpace) {
        let (_, column) = line_col(src, head.position);
        return Err(ParseError::MalformedName { name: head.text.clone(), line, column });
    }

    let mut arguments = Vec::new();
    let mut current: Option<Argument> = None;
    for tok in rest {
        let part = match tok.kind {
            TokenKind::WhiteSpace => {
                arguments.extend(current.take());
                continue;
            }
            TokenKind::VariableName => ArgPart::Variable(tok.text.clone()),
            _ => ArgPart::Literal(tok.text.clone()),
        };
        current.get_or_insert_with(Argument::default).push(part);
    }
    arguments.extend(current);

    Ok(Some(Invocation {
        function_name: head.text.clone(),
        arguments,
        line,
        position: head.position,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
