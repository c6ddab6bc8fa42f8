//! # Runtime
//!
//! Process startup and the controller watch loops.
//!
//! - `initialization`: tracing, metrics server, cluster client and reconciler wiring
//! - `watch_loop`: one controller per watched kind
//! - `error_policy`: requeue decisions and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
