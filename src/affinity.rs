//! Session affinity: context -> resource routing hints with TTL
//!
//! Related requests (same origin, tenant, session) prefer the resource they
//! used last so warm state survives across acquires. A hint is only ever a
//! preference: the pool re-validates that the hinted resource is idle and
//! healthy, and falls back to the free list otherwise.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct AffinityRecord {
    resource_id: u64,
    expires_at: Instant,
}

pub(crate) struct AffinityManager {
    records: DashMap<String, AffinityRecord>,
    ttl: Duration,
}

impl AffinityManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Look up the hinted resource for a context. Expired records are
    /// dropped on read.
    pub fn get(&self, context: &str) -> Option<u64> {
        let expired = match self.records.get(context) {
            Some(record) if record.expires_at > Instant::now() => {
                return Some(record.resource_id);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove(context);
        }
        None
    }

    /// Record (or refresh) the mapping for a context. At most one mapping
    /// per context key.
    pub fn set(&self, context: &str, resource_id: u64) {
        self.records.insert(
            context.to_string(),
            AffinityRecord {
                resource_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every mapping that points at an evicted resource.
    pub fn forget_resource(&self, resource_id: u64) {
        self.records.retain(|_, r| r.resource_id != resource_id);
    }

    /// Periodic sweep of expired records. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.records.len();
        let now = Instant::now();
        self.records.retain(|_, r| r.expires_at > now);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
