//! # Reconcile Observer
//!
//! The seam through which the reconcile path reports what it did. Production
//! wires `PrometheusObserver`; tests inspect a `RecordingObserver`.

use crate::controller::apply::{ApplyReport, ObjectKind};
use crate::crd::MirrorOutcome;
use crate::observability::metrics;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub trait ReconcileObserver: Send + Sync {
    fn reconcile_started(&self, _kind: ObjectKind) {}

    fn reconcile_finished(&self, _kind: ObjectKind, _duration: Duration, _ok: bool) {}

    fn objects_applied(&self, _kind: ObjectKind, _report: &ApplyReport) {}

    fn apply_deduplicated(&self, _kind: ObjectKind) {}

    fn policy_failed(&self, _kind: ObjectKind, _terminal: bool) {}

    fn mirror_operation(&self, _outcome: MirrorOutcome) {}
}

/// Reports into the process Prometheus registry
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl ReconcileObserver for PrometheusObserver {
    fn reconcile_started(&self, kind: ObjectKind) {
        metrics::increment_reconciliations(kind.as_str());
    }

    fn reconcile_finished(&self, kind: ObjectKind, duration: Duration, ok: bool) {
        metrics::observe_reconciliation_duration(kind.as_str(), duration.as_secs_f64());
        if !ok {
            metrics::increment_reconciliation_errors(kind.as_str());
        }
    }

    fn objects_applied(&self, _kind: ObjectKind, report: &ApplyReport) {
        metrics::increment_objects_applied("create", report.created);
        metrics::increment_objects_applied("update", report.updated);
        metrics::increment_objects_applied("delete", report.deleted);
    }

    fn apply_deduplicated(&self, kind: ObjectKind) {
        metrics::increment_apply_deduplicated(kind.as_str());
    }

    fn policy_failed(&self, kind: ObjectKind, terminal: bool) {
        metrics::increment_policy_failures(kind.as_str(), terminal);
    }

    fn mirror_operation(&self, outcome: MirrorOutcome) {
        metrics::increment_mirror_operations(outcome.as_str());
    }
}

/// Something a `RecordingObserver` saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Started(ObjectKind),
    Finished { kind: ObjectKind, ok: bool },
    Applied { kind: ObjectKind, report: ApplyReport },
    Deduplicated(ObjectKind),
    PolicyFailed { kind: ObjectKind, terminal: bool },
    Mirror(MirrorOutcome),
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: ObservedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ReconcileObserver for RecordingObserver {
    fn reconcile_started(&self, kind: ObjectKind) {
        self.record(ObservedEvent::Started(kind));
    }

    fn reconcile_finished(&self, kind: ObjectKind, _duration: Duration, ok: bool) {
        self.record(ObservedEvent::Finished { kind, ok });
    }

    fn objects_applied(&self, kind: ObjectKind, report: &ApplyReport) {
        self.record(ObservedEvent::Applied {
            kind,
            report: *report,
        });
    }

    fn apply_deduplicated(&self, kind: ObjectKind) {
        self.record(ObservedEvent::Deduplicated(kind));
    }

    fn policy_failed(&self, kind: ObjectKind, terminal: bool) {
        self.record(ObservedEvent::PolicyFailed { kind, terminal });
    }

    fn mirror_operation(&self, outcome: MirrorOutcome) {
        self.record(ObservedEvent::Mirror(outcome));
    }
}
