//! Status reporting sinks.
//!
//! A [`StatusSink`] receives the human-readable "current status" text pushed
//! by the `UpdateStatus` builtin.  How that text reaches an observer (a push
//! channel to a connected client, a log, a terminal line) is the sink's
//! business; the engine only calls [`StatusSink::report`] synchronously.
//!
//! Sinks may be shared by concurrently running sessions, so each one does its
//! own serialization.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::watch;

/// Receiver of status text.
pub trait StatusSink: Send + Sync {
    fn report(&self, text: &str);
}

impl fmt::Debug for dyn StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatusSink")
    }
}

// ── WatchStatus ───────────────────────────────────────────────────────────────

/// Publishes the latest status on a [`tokio::sync::watch`] channel.
///
/// Observers call [`WatchStatus::subscribe`] and see only the most recent
/// value, which is the "current status" semantics a dashboard wants.
#[derive(Debug)]
pub struct WatchStatus {
    tx: watch::Sender<String>,
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchStatus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(String::new());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    /// The most recently reported status (empty before the first report).
    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }
}

impl StatusSink for WatchStatus {
    fn report(&self, text: &str) {
        // send_replace stores the value even when nobody is subscribed yet.
        self.tx.send_replace(text.to_owned());
    }
}

// ── RecordingStatus ───────────────────────────────────────────────────────────

/// Keeps every reported status, in order.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    seen: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far.
    pub fn history(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<String> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

impl StatusSink for RecordingStatus {
    fn report(&self, text: &str) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).push(text.to_owned());
    }
}

// ── TracingStatus / NullStatus ────────────────────────────────────────────────

/// Emits each status as an `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn report(&self, text: &str) {
        tracing::info!(target: "autoscript::status", status = text, "status updated");
    }
}

/// Discards every status.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn report(&self, _text: &str) {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn watch_keeps_latest() {
        let sink = WatchStatus::new();
        let rx = sink.subscribe();
        sink.report("one");
        sink.report("two");
        assert_eq!(*rx.borrow(), "two");
        assert_eq!(sink.current(), "two");
    }

    #[test]
    fn watch_without_subscribers_still_updates() {
        let sink = WatchStatus::new();
        sink.report("idle");
        assert_eq!(sink.current(), "idle");
    }

    #[test]
    fn recording_keeps_order() {
        let sink = RecordingStatus::new();
        assert_eq!(sink.last(), None);
        sink.report("a");
        sink.report("b");
        assert_eq!(sink.history(), vec!["a", "b"]);
        assert_eq!(sink.last().as_deref(), Some("b"));
    }

    #[test]
    fn recording_from_many_threads() {
        let sink = Arc::new(RecordingStatus::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        sink.report(&format!("{i}:{j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.history().len(), 100);
    }
}
