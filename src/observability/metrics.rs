//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `user_access_reconciliations_total{kind}` - Reconciliations started
//! - `user_access_reconciliation_errors_total{kind}` - Reconciliations that returned an error
//! - `user_access_reconciliation_duration_seconds{kind}` - Duration of reconciliations
//! - `user_access_objects_applied_total{operation}` - Derived objects created, updated or deleted
//! - `user_access_apply_deduplicated_total{kind}` - Apply steps skipped for an unchanged revision
//! - `user_access_policy_failures_total{kind,terminal}` - Policy passes that reported a failure
//! - `user_access_mirror_operations_total{outcome}` - External mirror pushes and removals
//! - `user_access_requeues_total{reason}` - Requeues scheduled by the error policy

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("user_access_reconciliations_total", "Total number of reconciliations"),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "user_access_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "user_access_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "user_access_objects_applied_total",
            "Total number of derived objects written, by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static APPLY_DEDUPLICATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "user_access_apply_deduplicated_total",
            "Total number of apply steps skipped because the revision was already applied",
        ),
        &["kind"],
    )
    .expect("Failed to create APPLY_DEDUPLICATED_TOTAL metric - this should never happen")
});

static POLICY_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "user_access_policy_failures_total",
            "Total number of policy passes that reported a failure",
        ),
        &["kind", "terminal"],
    )
    .expect("Failed to create POLICY_FAILURES_TOTAL metric - this should never happen")
});

static MIRROR_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "user_access_mirror_operations_total",
            "Total number of external mirror operations, by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create MIRROR_OPERATIONS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("user_access_requeues_total", "Total number of requeues, by reason"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only if a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPLY_DEDUPLICATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLICY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MIRROR_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_objects_applied(operation: &str, count: usize) {
    if count > 0 {
        OBJECTS_APPLIED_TOTAL
            .with_label_values(&[operation])
            .inc_by(count as u64);
    }
}

pub fn increment_apply_deduplicated(kind: &str) {
    APPLY_DEDUPLICATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_policy_failures(kind: &str, terminal: bool) {
    let terminal = if terminal { "true" } else { "false" };
    POLICY_FAILURES_TOTAL
        .with_label_values(&[kind, terminal])
        .inc();
}

pub fn increment_mirror_operations(outcome: &str) {
    MIRROR_OPERATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
