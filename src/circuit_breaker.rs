//! Creation breaker: fail fast when the driver cannot create resources
//!
//! Consecutive `create()` failures usually mean the backing system (browser
//! binary, WASM engine, remote endpoint) is down. Instead of hammering it
//! from every acquire that needs a fresh resource, the breaker opens after a
//! threshold of consecutive failures and rejects creation attempts until a
//! cooldown elapses; the first attempt after the cooldown probes recovery.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast, waiting out the cooldown.
    Open,
    /// Cooldown elapsed, one probe attempt allowed.
    HalfOpen,
}

pub(crate) struct CreationBreaker {
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicUsize,
    threshold: usize,
    cooldown: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CreationBreaker {
    pub fn new(threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicUsize::new(0),
            threshold,
            cooldown,
            opened_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.state.lock()
    }

    /// Whether a creation attempt is currently allowed.
    pub fn allow_attempt(&self) -> bool {
        let current = self.state();
        match current {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = *self.opened_at.lock();
                if let Some(at) = opened_at
                    && at.elapsed() > self.cooldown
                {
                    *self.state.lock() = BreakerState::HalfOpen;
                    return true;
                }
                false
            }
        }
    }

    /// A creation succeeded; close the breaker.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.state.lock() = BreakerState::Closed;
    }

    /// A creation failed. Returns true when this failure tripped the
    /// breaker open.
    pub fn record_failure(&self) -> bool {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed if count >= self.threshold => {
                *state = BreakerState::Open;
                *self.opened_at.lock() = Some(Instant::now());
                true
            }
            BreakerState::HalfOpen => {
                // Probe failed, back to waiting.
                *state = BreakerState::Open;
                *self.opened_at.lock() = Some(Instant::now());
                false
            }
            _ => false,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
