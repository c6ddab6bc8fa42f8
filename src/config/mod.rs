//! # Configuration
//!
//! Controller settings sourced from the environment.

pub mod controller;

pub use controller::ControllerConfig;
