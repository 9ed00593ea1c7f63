//! autoscript: a line-oriented automation script engine.
//!
//! See [`script`] for the engine itself, [`session`] for running scripts per
//! workspace (including concurrently and with timeouts), and [`status`] for
//! the sinks that surface a "current status" to observers.

pub mod cli;
pub mod config;
pub mod script;
pub mod session;
pub mod status;
pub mod var;
