use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use autoscript::cli::{self, ConfigFile, ScriptSource};
use autoscript::config::Config;
use autoscript::script::{Registry, RunOutcome, Status};
use autoscript::session::{self, Session};
use autoscript::status::RecordingStatus;

/// Exit status when the script could not be run at all (bad arguments,
/// unreadable files, parse errors).
const EXIT_NOT_RUN: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(EXIT_NOT_RUN) } else { ExitCode::SUCCESS };
        }
    };

    // ── Load config ───────────────────────────────────────────────────────────
    let config_path = match args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(ref path) => Some(path.clone()),
        ConfigFile::Search => cli::find_user_config(),
    };
    let mut config = Config::new();
    if let Some(path) = &config_path {
        match Config::load_file(path) {
            Ok((cfg, errors)) => {
                for e in errors {
                    eprintln!("autoscript: warning: {}: {e}", path.display());
                }
                config = cfg;
            }
            Err(e) => {
                eprintln!("autoscript: {}: {e}", path.display());
                return ExitCode::from(EXIT_NOT_RUN);
            }
        }
    }

    init_tracing(args.verbose, config.log.as_deref());
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let registry = match Registry::with_builtins() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("autoscript: {e}");
            return ExitCode::from(EXIT_NOT_RUN);
        }
    };

    if args.list {
        for d in registry.descriptors() {
            println!("{:<14} {}", d.name, d.description);
        }
        return ExitCode::SUCCESS;
    }

    // ── Read script ───────────────────────────────────────────────────────────
    let script = match &args.source {
        ScriptSource::Command(text) => Ok(text.clone()),
        ScriptSource::File(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("{}: {e}", path.display())),
        ScriptSource::Stdin => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map(|_| buf)
                .map_err(|e| format!("stdin: {e}"))
        }
    };
    let script = match script {
        Ok(s) => s,
        Err(e) => {
            eprintln!("autoscript: {e}");
            return ExitCode::from(EXIT_NOT_RUN);
        }
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let status = Arc::new(RecordingStatus::new());
    let mut sess = Session::new("cli", status.clone());
    sess.vars_mut()
        .extend(config.vars.iter().map(|(n, v)| (n.to_owned(), v.clone())));
    sess.vars_mut().extend(args.defines);

    let policy = args.policy.or(config.policy).unwrap_or_default();
    let run = match args.timeout.or(config.timeout) {
        Some(limit) => session::run_with_timeout(registry, sess, script, policy, limit).await,
        None => session::run_blocking(registry, sess, script, policy).await,
    };

    let outcome = match run.map(|f| f.outcome) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            eprintln!("autoscript: {e}");
            return ExitCode::from(EXIT_NOT_RUN);
        }
        Err(e) => {
            eprintln!("autoscript: {e}");
            return ExitCode::from(EXIT_NOT_RUN);
        }
    };

    // ── Report ────────────────────────────────────────────────────────────────
    let history = status.history();
    if args.json {
        let report = Report { outcome: &outcome, status_updates: &history };
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("autoscript: {e}");
                return ExitCode::from(EXIT_NOT_RUN);
            }
        }
    } else {
        print_text(&outcome, &history);
    }

    ExitCode::from(exit_code(outcome.verdict))
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    outcome: &'a RunOutcome,
    status_updates: &'a [String],
}

fn print_text(outcome: &RunOutcome, history: &[String]) {
    for text in history {
        println!("status: {text}");
    }
    for r in &outcome.results {
        match &r.message {
            Some(msg) => println!("{:<7} {}: {msg}", r.status, r.function_name),
            None => println!("{:<7} {}", r.status, r.function_name),
        }
    }
    println!("verdict: {} ({})", outcome.verdict, outcome.state);
}

fn exit_code(verdict: Status) -> u8 {
    match verdict {
        Status::Pass => 0,
        Status::Fail => 1,
        Status::Error => 2,
        Status::Skipped => 3,
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the level over the config's filter.
fn init_tracing(verbose: u8, config_filter: Option<&str>) {
    let fallback = match verbose {
        0 => config_filter.unwrap_or("warn").to_owned(),
        1 => "autoscript=info".to_owned(),
        2 => "autoscript=debug".to_owned(),
        _ => "autoscript=trace".to_owned(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
