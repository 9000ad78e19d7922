//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use taskdefine_core::{TaskDefine, TaskDefineState};

use crate::state::AppState;

/// Counters updated by the reconciler and the control loop.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    reconcile_success: AtomicU64,
    reconcile_error: AtomicU64,
    not_found: AtomicU64,
    conflicts: AtomicU64,
    status_writes: AtomicU64,
    finalizers_added: AtomicU64,
    finalizers_removed: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self) {
        self.reconcile_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.reconcile_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_write(&self) {
        self.status_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_added(&self) {
        self.finalizers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_removed(&self) {
        self.finalizers_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_success(&self) -> u64 {
        self.reconcile_success.load(Ordering::Relaxed)
    }

    pub fn reconcile_error(&self) -> u64 {
        self.reconcile_error.load(Ordering::Relaxed)
    }

    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::Relaxed)
    }

    pub fn finalizers_added(&self) -> u64 {
        self.finalizers_added.load(Ordering::Relaxed)
    }

    pub fn finalizers_removed(&self) -> u64 {
        self.finalizers_removed.load(Ordering::Relaxed)
    }
}

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_reconcile_metrics(&state.metrics, &mut output);
    let objects = state.store.list().await;
    collect_object_metrics(&objects, &mut output);

    output
}

/// Reconcile counters.
fn collect_reconcile_metrics(metrics: &ControllerMetrics, output: &mut String) {
    writeln!(
        output,
        "# HELP taskdefine_reconcile_total Reconcile invocations by result"
    )
    .ok();
    writeln!(output, "# TYPE taskdefine_reconcile_total counter").ok();
    writeln!(
        output,
        "taskdefine_reconcile_total{{result=\"success\"}} {}",
        metrics.reconcile_success()
    )
    .ok();
    writeln!(
        output,
        "taskdefine_reconcile_total{{result=\"error\"}} {}",
        metrics.reconcile_error()
    )
    .ok();
    writeln!(
        output,
        "taskdefine_reconcile_total{{result=\"not_found\"}} {}",
        metrics.not_found()
    )
    .ok();

    let counters = [
        (
            "taskdefine_conflicts_total",
            "Optimistic-concurrency conflicts seen on writes",
            metrics.conflicts(),
        ),
        (
            "taskdefine_status_writes_total",
            "Status subresource writes issued",
            metrics.status_writes(),
        ),
        (
            "taskdefine_finalizers_added_total",
            "Finalizers added to live objects",
            metrics.finalizers_added(),
        ),
        (
            "taskdefine_finalizers_removed_total",
            "Finalizers removed after cleanup",
            metrics.finalizers_removed(),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(output).ok();
        writeln!(output, "# HELP {name} {help}").ok();
        writeln!(output, "# TYPE {name} counter").ok();
        writeln!(output, "{name} {value}").ok();
    }
}

/// Stored objects by status state.
fn collect_object_metrics(objects: &[TaskDefine], output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskdefine_objects Stored TaskDefine objects by state"
    )
    .ok();
    writeln!(output, "# TYPE taskdefine_objects gauge").ok();

    for state in TaskDefineState::all() {
        let count = objects
            .iter()
            .filter(|o| o.status.state == Some(state))
            .count();
        writeln!(output, "taskdefine_objects{{state=\"{state}\"}} {count}").ok();
    }
    let uninitialized = objects.iter().filter(|o| o.status.state.is_none()).count();
    writeln!(
        output,
        "taskdefine_objects{{state=\"\"}} {uninitialized}"
    )
    .ok();
}
