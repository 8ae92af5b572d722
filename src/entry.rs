//! Per-slot lifecycle state and metadata

use std::time::{Duration, Instant};

/// State of one pool slot.
///
/// Transitions: `Idle -> InUse -> Idle`, `Idle -> Validating -> (Idle |
/// Unhealthy)`. `Unhealthy` slots are evicted by the monitor; eviction
/// removes the entry from the pool map entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Idle,
    InUse,
    Validating,
    Unhealthy,
}

/// One slot in the pool: the resource (while not checked out) plus
/// lifecycle metadata.
pub(crate) struct PoolEntry<T> {
    /// Present while Idle or Validating; taken by the guard while InUse.
    pub resource: Option<T>,
    pub state: EntryState,
    pub created_at: Instant,
    pub last_used: Instant,
    pub use_count: u64,
    /// Last sampled memory footprint in bytes.
    pub memory_bytes: u64,
    /// Consecutive cheap-probe failures. One failure is tolerated; the
    /// full diagnostic decides eviction.
    pub liveness_failures: u32,
}

impl<T> PoolEntry<T> {
    pub fn new(resource: T, memory_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            resource: Some(resource),
            state: EntryState::Idle,
            created_at: now,
            last_used: now,
            use_count: 0,
            memory_bytes,
            liveness_failures: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
        self.use_count += 1;
    }

    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        match max_lifetime {
            Some(limit) => self.created_at.elapsed() > limit,
            None => false,
        }
    }

    pub fn is_idle_expired(&self, idle_timeout: Option<Duration>) -> bool {
        match idle_timeout {
            Some(limit) => self.state == EntryState::Idle && self.last_used.elapsed() > limit,
            None => false,
        }
    }
}
