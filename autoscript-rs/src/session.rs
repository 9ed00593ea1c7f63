//! Sessions and the async runner.
//!
//! A [`Session`] owns one [`VarStore`] and the [`RunContext`] its scripts run
//! with, so consecutive scripts in the same workspace share variables.
//!
//! Script runs are synchronous and may block inside a unit, so the async
//! helpers move the session onto tokio's blocking pool:
//!
//! ```text
//!   run_blocking(session A) ──► spawn_blocking ──► Orchestrator::run ─┐
//!   run_blocking(session B) ──► spawn_blocking ──► Orchestrator::run ─┤
//!                                   ▲                                 │
//!                      Arc<Registry> (shared, read-only)              ▼
//!                                                         Finished { session, outcome }
//! ```
//!
//! [`run_with_timeout`] adds a caller-level deadline: when it passes, the
//! session's cancel token is set, the step in flight finishes (or notices the
//! token), and the run ends `Aborted` with an `Error` step.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::script::{
    CancelToken, FailurePolicy, Orchestrator, ParseError, Registry, RunContext, RunOutcome,
};
use crate::status::StatusSink;
use crate::var::VarStore;

// ── Session ───────────────────────────────────────────────────────────────────

/// Variables and context for one workspace.
#[derive(Debug)]
pub struct Session {
    vars: VarStore,
    ctx: RunContext,
}

impl Session {
    pub fn new(id: impl Into<String>, status: Arc<dyn StatusSink>) -> Self {
        Self { vars: VarStore::new(), ctx: RunContext::new(id, status) }
    }

    pub fn id(&self) -> &str {
        &self.ctx.session_id
    }

    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VarStore {
        &mut self.vars
    }

    /// Token that stops the current and future runs until replaced.
    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    /// Give the session a fresh, uncancelled token.
    pub fn renew_cancel_token(&mut self) -> CancelToken {
        self.ctx.cancel = CancelToken::new();
        self.ctx.cancel.clone()
    }

    /// Run one script against this session's variables.
    pub fn run(
        &mut self,
        registry: &Registry,
        src: &str,
        policy: FailurePolicy,
    ) -> Result<RunOutcome, ParseError> {
        tracing::debug!(session = %self.ctx.session_id, ?policy, "running script");
        Orchestrator::new(registry)
            .with_policy(policy)
            .run(src, &mut self.vars, &self.ctx)
    }
}

// ── Async runner ──────────────────────────────────────────────────────────────

/// A session handed back after a run, with the run's outcome.
#[derive(Debug)]
pub struct Finished {
    pub session: Session,
    pub outcome: Result<RunOutcome, ParseError>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The blocking task panicked or was cancelled by the runtime.
    #[error("script task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run `script` on tokio's blocking pool.
pub async fn run_blocking(
    registry: Arc<Registry>,
    mut session: Session,
    script: String,
    policy: FailurePolicy,
) -> Result<Finished, SessionError> {
    let finished = tokio::task::spawn_blocking(move || {
        let outcome = session.run(&registry, &script, policy);
        Finished { session, outcome }
    })
    .await?;
    Ok(finished)
}

/// Like [`run_blocking`], cancelling the run once `limit` has elapsed.
///
/// The session gets a fresh cancel token first, and a timeout's cancellation
/// is cleared once the run has stopped, so only the timed-out run is affected.
pub async fn run_with_timeout(
    registry: Arc<Registry>,
    mut session: Session,
    script: String,
    policy: FailurePolicy,
    limit: Duration,
) -> Result<Finished, SessionError> {
    let cancel = session.renew_cancel_token();
    let id = session.id().to_owned();
    let mut handle = tokio::task::spawn_blocking(move || {
        let outcome = session.run(&registry, &script, policy);
        Finished { session, outcome }
    });

    match tokio::time::timeout(limit, &mut handle).await {
        Ok(joined) => Ok(joined?),
        Err(_) => {
            tracing::warn!(session = %id, ?limit, "script timed out; cancelling");
            cancel.cancel();
            let finished = handle.await?;
            cancel.reset();
            Ok(finished)
        }
    }
}

/// Run several sessions' scripts concurrently against one registry.
///
/// Results come back in input order.
pub async fn run_concurrently(
    registry: Arc<Registry>,
    jobs: Vec<(Session, String)>,
    policy: FailurePolicy,
) -> Vec<Result<Finished, SessionError>> {
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|(session, script)| {
            tokio::spawn(run_blocking(Arc::clone(&registry), session, script, policy))
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        out.push(match h.await {
            Ok(res) => res,
            Err(e) => Err(SessionError::Join(e)),
        });
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{RunState, Status};
    use crate::status::{NullStatus, RecordingStatus, WatchStatus};

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::with_builtins().unwrap())
    }

    #[test]
    fn variables_persist_across_runs() {
        let reg = Registry::with_builtins().unwrap();
        let mut s = Session::new("ws", Arc::new(NullStatus));
        s.run(&reg, "Set stage build", FailurePolicy::Abort).unwrap();
        let out = s.run(&reg, "AssertEqual $stage build", FailurePolicy::Abort).unwrap();
        assert!(out.is_pass());
        assert_eq!(s.vars().read_string("stage", ""), "build");
    }

    #[test]
    fn session_reports_through_its_sink() {
        let reg = Registry::with_builtins().unwrap();
        let sink = Arc::new(RecordingStatus::new());
        let mut s = Session::new("ws", sink.clone());
        s.run(&reg, "UpdateStatus deploying\nUpdateStatus done", FailurePolicy::Abort)
            .unwrap();
        assert_eq!(sink.history(), vec!["deploying", "done"]);
    }

    #[tokio::test]
    async fn blocking_run_returns_session() {
        let s = Session::new("a", Arc::new(NullStatus));
        let fin = run_blocking(registry(), s, "Set k v".into(), FailurePolicy::Abort)
            .await
            .unwrap();
        assert!(fin.outcome.unwrap().is_pass());
        assert_eq!(fin.session.vars().read_string("k", ""), "v");
    }

    #[tokio::test]
    async fn parse_error_still_returns_session() {
        let s = Session::new("a", Arc::new(NullStatus));
        let fin = run_blocking(registry(), s, "Echo \"open".into(), FailurePolicy::Abort)
            .await
            .unwrap();
        assert!(matches!(fin.outcome, Err(ParseError::Lex(_))));
        assert_eq!(fin.session.id(), "a");
    }

    #[tokio::test]
    async fn concurrent_sessions_are_isolated() {
        let sink = Arc::new(WatchStatus::new());
        let jobs = (0..4)
            .map(|i| {
                let s = Session::new(format!("ws{i}"), sink.clone());
                (s, format!("Set who w{i}\nSleep 5\nAssertEqual $who w{i}\nUpdateStatus w{i}"))
            })
            .collect();
        let results = run_concurrently(registry(), jobs, FailurePolicy::Abort).await;
        assert_eq!(results.len(), 4);
        for (i, r) in results.into_iter().enumerate() {
            let fin = r.unwrap();
            assert!(fin.outcome.unwrap().is_pass());
            assert_eq!(fin.session.vars().read_string("who", ""), format!("w{i}"));
        }
        assert!(sink.current().starts_with('w'));
    }

    #[tokio::test]
    async fn timeout_cancels_run() {
        let s = Session::new("slow", Arc::new(NullStatus));
        let fin = run_with_timeout(
            registry(),
            s,
            "Echo start\nSleep 60000\nEcho never".into(),
            FailurePolicy::Continue,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let out = fin.outcome.unwrap();
        assert_eq!(out.statuses(), vec![Status::Pass, Status::Error, Status::Skipped]);
        assert_eq!(out.results[1].message.as_deref(), Some("cancelled"));
        assert_eq!(out.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn session_usable_after_timeout() {
        let reg = registry();
        let s = Session::new("ws", Arc::new(NullStatus));
        let fin = run_with_timeout(
            Arc::clone(&reg),
            s,
            "Sleep 60000".into(),
            FailurePolicy::Abort,
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        assert_eq!(fin.outcome.unwrap().statuses(), vec![Status::Error]);
        assert!(!fin.session.cancel_token().is_cancelled());

        let fin = run_blocking(reg, fin.session, "Echo hi".into(), FailurePolicy::Abort)
            .await
            .unwrap();
        assert_eq!(fin.outcome.unwrap().statuses(), vec![Status::Pass]);
    }

    #[tokio::test]
    async fn timeout_not_reached() {
        let s = Session::new("fast", Arc::new(NullStatus));
        let fin = run_with_timeout(
            registry(),
            s,
            "Echo quick".into(),
            FailurePolicy::Abort,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(fin.outcome.unwrap().is_pass());
        assert!(!fin.session.cancel_token().is_cancelled());
    }
}
