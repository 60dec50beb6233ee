//! Per-build timing accumulator

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::hooks::HookTiming;

/// Accumulated wall time per label. Safe to feed from concurrent jobs.
#[derive(Debug, Default)]
pub struct Timing {
    totals: DashMap<String, Duration>,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, label: impl Into<String>, elapsed: Duration) {
        *self.totals.entry(label.into()).or_default() += elapsed;
    }

    /// Fold hook timings in under `"<hook>:<handler>"` labels.
    pub fn add_hooks(&self, timings: &[HookTiming]) {
        for timing in timings {
            self.add(format!("{}:{}", timing.id, timing.name), timing.duration);
        }
    }

    /// Start timing `label`; the elapsed time is added when the guard drops.
    pub fn start(&self, label: impl Into<String>) -> TimingGuard<'_> {
        TimingGuard {
            timing: self,
            label: Some(label.into()),
            started: Instant::now(),
        }
    }

    pub fn get(&self, label: &str) -> Option<Duration> {
        self.totals.get(label).map(|entry| *entry.value())
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// All labels, longest first.
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        let mut entries: Vec<_> = self
            .totals
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    pub fn report(&self) {
        for (label, elapsed) in self.snapshot() {
            tracing::debug!(label = %label, elapsed = ?elapsed, "timing");
        }
    }
}

pub struct TimingGuard<'a> {
    timing: &'a Timing,
    label: Option<String>,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        if let Some(label) = self.label.take() {
            self.timing.add(label, self.started.elapsed());
        }
    }
}
