//! Tracing setup and worker counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::worker::CycleOutcome;

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured filter. Calling this twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Counters for the lifetime of one worker process
#[derive(Debug, Default)]
pub struct Metrics {
    cycles: AtomicU64,
    completed: AtomicU64,
    reported_failures: AtomicU64,
    reports_lost: AtomicU64,
    waits: AtomicU64,
    faults: AtomicU64,
    cancellations: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &CycleOutcome) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            CycleOutcome::Completed {
                reported: false, ..
            } => &self.reports_lost,
            CycleOutcome::Completed { valid: false, .. } => &self.reported_failures,
            CycleOutcome::Completed { .. } => &self.completed,
            CycleOutcome::WaitedAndSkipped { .. } => &self.waits,
            CycleOutcome::Faulted { .. } => &self.faults,
            CycleOutcome::Cancelled { .. } => &self.cancellations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            reported_failures: self.reported_failures.load(Ordering::Relaxed),
            reports_lost: self.reports_lost.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            cycles = s.cycles,
            completed = s.completed,
            reported_failures = s.reported_failures,
            reports_lost = s.reports_lost,
            waits = s.waits,
            faults = s.faults,
            cancellations = s.cancellations,
            "Worker totals"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub completed: u64,
    pub reported_failures: u64,
    pub reports_lost: u64,
    pub waits: u64,
    pub faults: u64,
    pub cancellations: u64,
}
