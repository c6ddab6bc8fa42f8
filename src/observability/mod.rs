//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `observer`: reconcile event reporting

pub mod metrics;
pub mod observer;

pub use observer::{ObservedEvent, PrometheusObserver, ReconcileObserver, RecordingObserver};
