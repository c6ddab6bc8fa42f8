//! User Access Controller Library
//!
//! Derives ServiceAccounts, RBAC bindings and kubeconfigs from `User`
//! resources and mirrors kubeconfigs into GitHub Actions secrets.
//!
//! ## Quick Start
//!
//! ```rust
//! use user_access_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
