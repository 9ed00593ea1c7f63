//! Engine configuration file parser.
//!
//! A config file is line-oriented:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `policy abort` / `policy continue` | failure policy for runs |
//! | `timeout <secs>` | cancel a run after this long (fractions allowed) |
//! | `log <filter>` | default `tracing` filter, e.g. `autoscript=debug` |
//! | `set <name>=<value>` or `set <name> <value>` | preset a script variable |
//! | Lines starting with `;` | comment, ignored |
//! | Any other directive | silently skipped |
//!
//! Command-line flags override whatever the file sets.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::script::FailurePolicy;
use crate::var::VarStore;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Parsed engine configuration.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub policy: Option<FailurePolicy>,
    pub timeout: Option<Duration>,
    pub log: Option<String>,
    /// Variables every session starts with.
    pub vars: VarStore,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Returns the config and a list of any errors on recognised lines; a bad
    /// line leaves the corresponding setting untouched.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let (cmd, args_str) = line
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((line, ""));
            let tokens = split_args(args_str.trim());

            let res = match cmd {
                "policy" => parse_policy(&tokens).map(|p| config.policy = Some(p)),
                "timeout" => parse_timeout(&tokens).map(|t| config.timeout = Some(t)),
                "log" => parse_log(&tokens).map(|f| config.log = Some(f)),
                "set" => parse_set(&tokens, &mut config.vars),
                other => {
                    tracing::debug!(line = lineno, directive = other, "skipping unknown directive");
                    Ok(())
                }
            };
            if let Err(message) = res {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── Directives ────────────────────────────────────────────────────────────────

fn single<'t>(directive: &str, tokens: &'t [String]) -> Result<&'t str, String> {
    match tokens {
        [one] => Ok(one),
        [] => Err(format!("{directive}: requires an argument")),
        _ => Err(format!("{directive}: expected one argument, got {}", tokens.len())),
    }
}

fn parse_policy(tokens: &[String]) -> Result<FailurePolicy, String> {
    single("policy", tokens)?.parse()
}

fn parse_timeout(tokens: &[String]) -> Result<Duration, String> {
    let raw = single("timeout", tokens)?;
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(format!("timeout: `{raw}` is not a positive number of seconds")),
    }
}

fn parse_log(tokens: &[String]) -> Result<String, String> {
    single("log", tokens).map(str::to_owned)
}

/// Parse `set <name>=<value>` or `set <name> <value>`.
fn parse_set(tokens: &[String], vars: &mut VarStore) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("set: requires an argument".into());
    }

    let (name, value) = if let Some((n, v)) = tokens[0].split_once('=') {
        (n.to_owned(), v.to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("set: missing value for '{}'", tokens[0]));
    };

    if name.is_empty() {
        return Err("set: variable name cannot be empty".into());
    }

    vars.set(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
