//! Command-line argument parsing.
//!
//! Usage:
//!   autoscript [-f <config>] [-k] [-t <secs>] [-D <name>=<value>]... [--json] [-v...] <script>
//!   autoscript [-f <config>] ... -c <text>
//!   autoscript --list

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::script::FailurePolicy;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Which config file to load.
    pub config: ConfigFile,
    /// Where the script text comes from.
    pub source: ScriptSource,
    /// `Some(Continue)` with `-k`; otherwise the config decides.
    pub policy: Option<FailurePolicy>,
    /// Cancel the run after this long (`-t`).
    pub timeout: Option<Duration>,
    /// Variables preset with `-D name=value`, in order given.
    pub defines: Vec<(String, String)>,
    /// Print the outcome as JSON.
    pub json: bool,
    /// List registered functions and exit.
    pub list: bool,
    /// Number of `-v` flags.
    pub verbose: u8,
}

/// How to choose the config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// Search `$AUTOSCRIPT_CONFIG`, `~/.autoscriptrc`, `./autoscript.conf` (default).
    #[default]
    Search,
    /// `--no-config`: run with built-in defaults.
    Skip,
    /// `-f <file>`: load this specific file.
    Explicit(PathBuf),
}

/// Where the script text comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ScriptSource {
    /// No script argument, or `-`.
    #[default]
    Stdin,
    /// `-c <text>`.
    Command(String),
    File(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "autoscript", version, about = "Run line-oriented automation scripts")]
struct RawArgs {
    /// Load configuration from FILE
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Do not load any configuration file
    #[arg(long = "no-config", conflicts_with = "config")]
    no_config: bool,

    /// Run TEXT instead of a script file
    #[arg(short = 'c', long = "command", value_name = "TEXT", conflicts_with = "script")]
    command: Option<String>,

    /// Script file to run (`-` for standard input)
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Keep going after a step fails
    #[arg(short = 'k', long = "keep-going")]
    keep_going: bool,

    /// Cancel the run after SECS seconds
    #[arg(short = 't', long = "timeout", value_name = "SECS", value_parser = parse_secs)]
    timeout: Option<Duration>,

    /// Preset a variable
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    define: Vec<(String, String)>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// List registered functions and exit
    #[arg(long)]
    list: bool,

    /// More logging (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

impl From<RawArgs> for CliArgs {
    fn from(raw: RawArgs) -> Self {
        let config = match (raw.no_config, raw.config) {
            (true, _) => ConfigFile::Skip,
            (false, Some(path)) => ConfigFile::Explicit(path),
            (false, None) => ConfigFile::Search,
        };
        let source = match (raw.command, raw.script) {
            (Some(text), _) => ScriptSource::Command(text),
            (None, Some(path)) if path.as_os_str() != "-" => ScriptSource::File(path),
            (None, _) => ScriptSource::Stdin,
        };
        CliArgs {
            config,
            source,
            policy: raw.keep_going.then_some(FailurePolicy::Continue),
            timeout: raw.timeout,
            defines: raw.define,
            json: raw.json,
            list: raw.list,
            verbose: raw.verbose,
        }
    }
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    match s.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(format!("`{s}` is not a positive number of seconds")),
    }
}

fn parse_define(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("`{s}` is not of the form NAME=VALUE")),
    }
}

/// Parse `std::env::args()`.
pub fn parse_args() -> Result<CliArgs, clap::Error> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    parse_argv(&raw)
}

/// Parse a slice of argument strings, program name excluded (exposed for
/// testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, clap::Error> {
    let raw = RawArgs::try_parse_from(
        std::iter::once("autoscript").chain(argv.iter().map(String::as_str)),
    )?;
    Ok(raw.into())
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("AUTOSCRIPT_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").unwrap_or_default();
    [format!("{home}/.autoscriptrc"), "./autoscript.conf".to_owned()]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
