//! Health and statistics snapshots
//!
//! Both snapshot types are derived from rolling counters and atomics; taking
//! one never performs I/O and never touches the pool mutex.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// How many samples the rolling acquisition/latency windows keep.
const WINDOW_CAPACITY: usize = 256;

/// Aggregate pool health derived from rolling counters.
///
/// # Examples
///
/// ```no_run
/// # use muxpool::PoolHealth;
/// # fn snapshot() -> PoolHealth { unimplemented!() }
/// let health = snapshot();
/// if !health.is_healthy() {
///     eprintln!("pool degraded: success rate {:.2}", health.success_rate);
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    /// Failed acquire attempts since pool creation.
    pub failed: u64,
    /// Fraction of acquire attempts that succeeded, 1.0 when none yet.
    pub success_rate: f64,
    pub avg_acquisition_time_ms: f64,
    pub avg_latency_ms: f64,
}

impl PoolHealth {
    pub fn is_healthy(&self) -> bool {
        self.success_rate >= 0.9
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub in_use: usize,
    pub total_capacity: usize,
    pub utilization: f64,
    pub wait_queue_depth: usize,
    pub tracked_memory_bytes: u64,
    pub created_total: u64,
    pub reused_total: u64,
    pub evicted_total: u64,
}

/// Rolling counters backing [`PoolHealth`] and [`PoolStats`].
///
/// Writers touch atomics plus a small sample window behind a
/// reader-writer lock that is never held across an await point.
pub(crate) struct CounterTracker {
    pub created: AtomicU64,
    pub reused: AtomicU64,
    pub evicted: AtomicU64,
    pub acquire_success: AtomicU64,
    pub acquire_failure: AtomicU64,
    pub queue_depth: AtomicUsize,
    acquire_times_ms: RwLock<VecDeque<f64>>,
    latencies_ms: RwLock<VecDeque<f64>>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            acquire_success: AtomicU64::new(0),
            acquire_failure: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            acquire_times_ms: RwLock::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
            latencies_ms: RwLock::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
        }
    }

    pub fn record_acquire_success(&self, elapsed_ms: f64) {
        self.acquire_success.fetch_add(1, Ordering::Relaxed);
        push_sample(&self.acquire_times_ms, elapsed_ms);
    }

    pub fn record_acquire_failure(&self) {
        self.acquire_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: f64) {
        push_sample(&self.latencies_ms, latency_ms);
    }

    pub fn success_rate(&self) -> f64 {
        let ok = self.acquire_success.load(Ordering::Relaxed);
        let failed = self.acquire_failure.load(Ordering::Relaxed);
        let attempts = ok + failed;
        if attempts == 0 {
            1.0
        } else {
            ok as f64 / attempts as f64
        }
    }

    pub fn avg_acquisition_time_ms(&self) -> f64 {
        average(&self.acquire_times_ms)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        average(&self.latencies_ms)
    }
}

fn push_sample(window: &RwLock<VecDeque<f64>>, sample: f64) {
    let mut window = window.write();
    if window.len() == WINDOW_CAPACITY {
        window.pop_front();
    }
    window.push_back(sample);
}

fn average(window: &RwLock<VecDeque<f64>>) -> f64 {
    let window = window.read();
    if window.is_empty() {
        0.0
    } else {
        window.iter().sum::<f64>() / window.len() as f64
    }
}
