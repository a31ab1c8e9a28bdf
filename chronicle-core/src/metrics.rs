//! Runtime counters and pass timings.
//!
//! Lightweight instrumentation for dashboards and soak tests: lock-free
//! `AtomicU64` counters on the hot paths, plus a small mutex-guarded ring
//! of recent maintenance-pass durations (read rarely, on export).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// How many recent pass durations the timing ring retains.
const TIMING_RING_CAPACITY: usize = 128;

/// Atomic counters incremented on the engine's hot paths.
#[derive(Debug, Default)]
pub struct ChronicleCounters {
    /// Records accepted through the ingestion API.
    pub records_appended: AtomicU64,
    /// Records evicted by the capacity cap.
    pub records_evicted: AtomicU64,
    /// Propagation hops scheduled.
    pub hops_scheduled: AtomicU64,
    /// Propagation hops delivered.
    pub hops_delivered: AtomicU64,
    /// Propagation hops dropped (missing source or target).
    pub hops_dropped: AtomicU64,
    /// Aggregate level crossings announced.
    pub level_changes: AtomicU64,
    /// Edge stance crossings announced.
    pub stance_changes: AtomicU64,
    /// Decay sweeps completed.
    pub decay_passes: AtomicU64,
    /// Analysis passes completed.
    pub analysis_passes: AtomicU64,
    /// Snapshots encoded.
    pub snapshots_taken: AtomicU64,
}

impl ChronicleCounters {
    /// Create a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            hops_scheduled: self.hops_scheduled.load(Ordering::Relaxed),
            hops_delivered: self.hops_delivered.load(Ordering::Relaxed),
            hops_dropped: self.hops_dropped.load(Ordering::Relaxed),
            level_changes: self.level_changes.load(Ordering::Relaxed),
            stance_changes: self.stance_changes.load(Ordering::Relaxed),
            decay_passes: self.decay_passes.load(Ordering::Relaxed),
            analysis_passes: self.analysis_passes.load(Ordering::Relaxed),
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Records accepted through the ingestion API.
    pub records_appended: u64,
    /// Records evicted by the capacity cap.
    pub records_evicted: u64,
    /// Propagation hops scheduled.
    pub hops_scheduled: u64,
    /// Propagation hops delivered.
    pub hops_delivered: u64,
    /// Propagation hops dropped.
    pub hops_dropped: u64,
    /// Aggregate level crossings.
    pub level_changes: u64,
    /// Edge stance crossings.
    pub stance_changes: u64,
    /// Decay sweeps completed.
    pub decay_passes: u64,
    /// Analysis passes completed.
    pub analysis_passes: u64,
    /// Snapshots encoded.
    pub snapshots_taken: u64,
}

/// One recorded maintenance-pass duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSample {
    /// Which pass ran ("decay", "propagation", "analysis").
    pub pass: &'static str,
    /// How long it took, in microseconds.
    pub elapsed_us: u64,
}

/// Bounded ring of recent pass durations.
#[derive(Debug, Default)]
pub struct PassTimings {
    samples: Mutex<VecDeque<PassSample>>,
}

impl PassTimings {
    /// Create an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pass duration, evicting the oldest sample when full.
    pub fn record(&self, pass: &'static str, elapsed_us: u64) {
        let mut samples = self.samples.lock();
        if samples.len() == TIMING_RING_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(PassSample { pass, elapsed_us });
    }

    /// Copy out the retained samples, oldest first.
    #[must_use]
    pub fn export(&self) -> Vec<PassSample> {
        self.samples.lock().iter().copied().collect()
    }

    /// Mean duration of retained samples for one pass, if any ran.
    #[must_use]
    pub fn mean_us(&self, pass: &str) -> Option<f64> {
        let samples = self.samples.lock();
        let matching: Vec<u64> = samples
            .iter()
            .filter(|s| s.pass == pass)
            .map(|s| s.elapsed_us)
            .collect();
        if matching.is_empty() {
            return None;
        }
        Some(matching.iter().sum::<u64>() as f64 / matching.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = ChronicleCounters::new();
        ChronicleCounters::bump(&counters.records_appended);
        ChronicleCounters::bump(&counters.records_appended);
        ChronicleCounters::add(&counters.records_evicted, 3);

        let snap = counters.snapshot();
        assert_eq!(snap.records_appended, 2);
        assert_eq!(snap.records_evicted, 3);
        assert_eq!(snap.hops_delivered, 0);
    }

    #[test]
    fn timing_ring_is_bounded() {
        let timings = PassTimings::new();
        for i in 0..200 {
            timings.record("decay", i);
        }
        let samples = timings.export();
        assert_eq!(samples.len(), TIMING_RING_CAPACITY);
        // Oldest entries were evicted.
        assert_eq!(samples[0].elapsed_us, 200 - TIMING_RING_CAPACITY as u64);
    }

    #[test]
    fn mean_filters_by_pass() {
        let timings = PassTimings::new();
        timings.record("decay", 10);
        timings.record("decay", 30);
        timings.record("analysis", 1_000);

        let mean = timings.mean_us("decay").expect("samples");
        assert!((mean - 20.0).abs() < f64::EPSILON);
        assert!(timings.mean_us("propagation").is_none());
    }
}
