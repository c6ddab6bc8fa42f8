//! # Controller
//!
//! Core controller modules for the User Access Controller.
//!
//! - `apply`: object-set apply engine with pruning
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `generating`: the reusable policy -> apply -> status algorithm
//! - `naming`: deterministic names for derived bindings
//! - `reconciler`: domain policies and reconcile entry points
//! - `server`: HTTP server for metrics and health checks

pub mod apply;
pub mod backoff;
pub mod generating;
pub mod naming;
pub mod reconciler;
pub mod server;
