//! Background health monitoring and pool maintenance
//!
//! An independently cancellable task running tiered probes: a cheap
//! liveness check on a short interval and a full diagnostic on a longer
//! one. Probes never run under the pool lock - candidates are moved to
//! `Validating` and taken out, probed, then re-admitted or evicted - so a
//! slow probe never blocks acquirers.
//!
//! The liveness tick also runs the expiry pass (idle timeout, max
//! lifetime), the memory-pressure pass, the affinity sweep, and minimum
//! size maintenance.

use crate::driver::{Diagnosis, PoolEvent, ResourceDriver};
use crate::entry::EntryState;
use crate::pool::Shared;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) struct HealthMonitor<D: ResourceDriver> {
    shared: Arc<Shared<D>>,
    shutdown: watch::Receiver<bool>,
}

impl<D: ResourceDriver> HealthMonitor<D> {
    pub fn new(shared: Arc<Shared<D>>, shutdown: watch::Receiver<bool>) -> Self {
        Self { shared, shutdown }
    }

    pub async fn run(mut self) {
        let mut liveness = tokio::time::interval(self.shared.config.liveness_interval);
        let mut diagnostic = tokio::time::interval(self.shared.config.diagnostic_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        diagnostic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately; consume the initial ticks so the
        // first real pass happens one period in.
        liveness.tick().await;
        diagnostic.tick().await;

        loop {
            tokio::select! {
                _ = liveness.tick() => {
                    self.liveness_pass().await;
                    self.expiry_pass().await;
                    self.memory_pass().await;
                    let swept = self.shared.affinity.sweep();
                    if swept > 0 {
                        debug!(swept, "swept expired affinity records");
                    }
                    self.shared.replenish().await;
                }
                _ = diagnostic.tick() => self.diagnostic_pass().await,
                _ = self.shutdown.changed() => break,
            }
        }
        debug!("health monitor stopped");
    }

    /// Cheap probe over every idle entry. A single failure is tolerated;
    /// repeated failures escalate to the full diagnostic immediately.
    pub(crate) async fn liveness_pass(&self) {
        for id in self.shared.idle_snapshot().await {
            let Some(resource) = self.shared.take_for_validation(id).await else {
                continue;
            };
            if self.shared.driver.validate(&resource).await {
                self.set_liveness_failures(id, 0).await;
                self.shared.readmit(id, resource).await;
                continue;
            }
            let failures = self.bump_liveness_failures(id).await;
            if failures <= 1 {
                debug!(id, "liveness probe soft failure, tolerating");
                self.shared.readmit(id, resource).await;
            } else {
                warn!(id, failures, "repeated liveness failures, escalating to diagnostic");
                self.diagnose_and_settle(id, resource).await;
            }
        }
    }

    /// Full diagnostic over every idle entry.
    pub(crate) async fn diagnostic_pass(&self) {
        for id in self.shared.idle_snapshot().await {
            let Some(resource) = self.shared.take_for_validation(id).await else {
                continue;
            };
            self.diagnose_and_settle(id, resource).await;
        }
    }

    /// Run the full probe on a taken-out resource and settle the slot:
    /// re-admit, recover in place, or evict with replacement.
    async fn diagnose_and_settle(&self, id: u64, mut resource: D::Resource) {
        match self.shared.driver.diagnose(&mut resource).await {
            Diagnosis::Healthy => {
                self.set_liveness_failures(id, 0).await;
                self.refresh_memory(id, &resource).await;
                self.shared.readmit(id, resource).await;
            }
            Diagnosis::Degraded => {
                if self.shared.driver.recover(&mut resource).await {
                    info!(id, "recovered resource in place");
                    self.shared.emit(PoolEvent::Recovered { id });
                    {
                        let mut state = self.shared.state.lock().await;
                        if let Some(entry) = state.entries.get_mut(&id) {
                            entry.liveness_failures = 0;
                            // The slot keeps its identity; the session
                            // underneath is new.
                            entry.created_at = Instant::now();
                        }
                    }
                    self.refresh_memory(id, &resource).await;
                    self.shared.readmit(id, resource).await;
                } else {
                    self.evict(id, resource, "in-place recovery failed").await;
                }
            }
            Diagnosis::Failed => {
                self.evict(id, resource, "diagnostic probe failed").await;
            }
        }
    }

    async fn evict(&self, id: u64, resource: D::Resource, reason: &str) {
        warn!(id, reason, "evicting unhealthy resource");
        self.shared.driver.close(resource).await;
        self.shared.remove_entry(id, reason).await;
        self.shared.replenish().await;
    }

    /// Destroy idle entries past their idle timeout or max lifetime.
    pub(crate) async fn expiry_pass(&self) {
        let stale = {
            let mut state = self.shared.state.lock().await;
            let ids: Vec<u64> = state.idle.iter().copied().collect();
            let mut stale = Vec::new();
            for id in ids {
                let expired = state
                    .entries
                    .get(&id)
                    .map(|e| {
                        e.is_expired(self.shared.config.max_lifetime)
                            || e.is_idle_expired(self.shared.config.idle_timeout)
                    })
                    .unwrap_or(false);
                if !expired {
                    continue;
                }
                state.idle.retain(|&x| x != id);
                self.shared.idle_count.fetch_sub(1, Ordering::Relaxed);
                if let Some(mut entry) = state.entries.remove(&id) {
                    self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
                    debug!(id, use_count = entry.use_count, "expiring idle resource");
                    stale.push((id, entry.resource.take(), entry.memory_bytes));
                }
            }
            stale
        };

        let evicted = stale.len();
        for (id, resource, memory) in stale {
            if let Some(resource) = resource {
                self.shared.driver.close(resource).await;
            }
            self.shared
                .tracked_memory
                .fetch_sub(memory, Ordering::Relaxed);
            self.shared.affinity.forget_resource(id);
            self.shared.counters.evicted.fetch_add(1, Ordering::Relaxed);
            self.shared.emit(PoolEvent::Evicted {
                id,
                reason: "expired".to_string(),
            });
        }
        if evicted > 0 {
            self.shared.update_memory_gate();
            self.shared.replenish().await;
        }
    }

    /// Recompute tracked memory and relieve pressure: over the soft limit,
    /// idle entries are evicted oldest-first; the hard-limit gate opens and
    /// closes with hysteresis in [`Shared::update_memory_gate`].
    pub(crate) async fn memory_pass(&self) {
        let (total_memory, idle_by_age) = {
            let mut state = self.shared.state.lock().await;
            // Re-sample idle entries; in-use entries keep their last known
            // footprint until release.
            let ids: Vec<u64> = state.idle.iter().copied().collect();
            for id in ids {
                if let Some(entry) = state.entries.get_mut(&id)
                    && let Some(resource) = entry.resource.as_ref()
                {
                    entry.memory_bytes = self.shared.driver.memory_usage(resource);
                }
            }
            let total: u64 = state.entries.values().map(|e| e.memory_bytes).sum();
            let mut idle: Vec<(u64, Instant)> = state
                .idle
                .iter()
                .filter_map(|id| state.entries.get(id).map(|e| (*id, e.last_used)))
                .collect();
            idle.sort_by_key(|&(_, last_used)| last_used);
            (total, idle)
        };
        self.shared
            .tracked_memory
            .store(total_memory, Ordering::Relaxed);

        if total_memory > self.shared.config.soft_memory_limit {
            warn!(
                tracked_bytes = total_memory,
                soft_limit = self.shared.config.soft_memory_limit,
                "tracked memory over soft limit, evicting idle resources"
            );
            for (id, _) in idle_by_age {
                if self.shared.tracked_memory.load(Ordering::Relaxed)
                    <= self.shared.config.soft_memory_limit
                {
                    break;
                }
                let removed = {
                    let mut state = self.shared.state.lock().await;
                    match state.entries.get(&id) {
                        Some(e) if e.state == EntryState::Idle => {
                            state.idle.retain(|&x| x != id);
                            self.shared.idle_count.fetch_sub(1, Ordering::Relaxed);
                            let mut entry = state
                                .entries
                                .remove(&id)
                                .expect("entry checked just above");
                            self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
                            Some((entry.resource.take(), entry.memory_bytes))
                        }
                        _ => None,
                    }
                };
                if let Some((resource, memory)) = removed {
                    if let Some(resource) = resource {
                        self.shared.driver.close(resource).await;
                    }
                    self.shared
                        .tracked_memory
                        .fetch_sub(memory, Ordering::Relaxed);
                    self.shared.affinity.forget_resource(id);
                    self.shared.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    self.shared.emit(PoolEvent::Evicted {
                        id,
                        reason: "memory pressure".to_string(),
                    });
                }
            }
        }

        self.shared.update_memory_gate();
    }

    async fn refresh_memory(&self, id: u64, resource: &D::Resource) {
        let memory = self.shared.driver.memory_usage(resource);
        {
            let mut state = self.shared.state.lock().await;
            if let Some(entry) = state.entries.get_mut(&id) {
                self.shared
                    .tracked_memory
                    .fetch_add(memory, Ordering::Relaxed);
                self.shared
                    .tracked_memory
                    .fetch_sub(entry.memory_bytes, Ordering::Relaxed);
                entry.memory_bytes = memory;
            }
        }
        self.shared.update_memory_gate();
    }

    async fn set_liveness_failures(&self, id: u64, value: u32) {
        let mut state = self.shared.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.liveness_failures = value;
        }
    }

    async fn bump_liveness_failures(&self, id: u64) -> u32 {
        let mut state = self.shared.state.lock().await;
        match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.liveness_failures += 1;
                entry.liveness_failures
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::{ConnectionPool, Pool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
    use std::time::Duration;

    struct ProbeDriver {
        serial: AtomicU64,
        valid: Arc<AtomicBool>,
        degraded: Arc<AtomicBool>,
        recoverable: Arc<AtomicBool>,
        closed: Arc<AtomicUsize>,
    }

    impl ProbeDriver {
        fn new() -> Self {
            Self {
                serial: AtomicU64::new(0),
                valid: Arc::new(AtomicBool::new(true)),
                degraded: Arc::new(AtomicBool::new(false)),
                recoverable: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("probe driver failure")]
    struct ProbeFailure;

    #[async_trait]
    impl ResourceDriver for ProbeDriver {
        type Resource = u64;
        type Error = ProbeFailure;

        async fn create(&self) -> Result<u64, ProbeFailure> {
            Ok(self.serial.fetch_add(1, Ordering::Relaxed))
        }

        async fn validate(&self, _resource: &u64) -> bool {
            self.valid.load(Ordering::Relaxed)
        }

        async fn close(&self, _resource: u64) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }

        async fn diagnose(&self, _resource: &mut u64) -> Diagnosis {
            if self.degraded.load(Ordering::Relaxed) {
                Diagnosis::Degraded
            } else if self.valid.load(Ordering::Relaxed) {
                Diagnosis::Healthy
            } else {
                Diagnosis::Failed
            }
        }

        async fn recover(&self, _resource: &mut u64) -> bool {
            self.recoverable.load(Ordering::Relaxed)
        }
    }

    // Long intervals keep the spawned monitor quiet; the passes under test
    // are invoked directly.
    fn quiet_config() -> PoolConfig {
        PoolConfig::new()
            .with_min_size(0)
            .with_max_size(4)
            .with_health_intervals(Duration::from_secs(3600), Duration::from_secs(3600))
            .with_acquire_timeout(Duration::from_millis(200))
    }

    // The monitor's run loop stays idle in these tests (hour-long
    // intervals); passes are invoked directly.
    fn monitor_for<D: ResourceDriver>(pool: &ConnectionPool<D>) -> HealthMonitor<D> {
        let (_tx, rx) = watch::channel(false);
        HealthMonitor::new(Arc::clone(pool.shared()), rx)
    }

    async fn pool_with_one_idle(driver: ProbeDriver) -> ConnectionPool<ProbeDriver> {
        let pool = ConnectionPool::new(driver, quiet_config()).await.unwrap();
        let guard = pool.acquire().await.unwrap();
        pool.release(guard).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn single_liveness_failure_is_tolerated() {
        let driver = ProbeDriver::new();
        let valid = Arc::clone(&driver.valid);
        let pool = pool_with_one_idle(driver).await;
        let monitor = monitor_for(&pool);

        valid.store(false, Ordering::Relaxed);
        monitor.liveness_pass().await;

        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn repeated_liveness_failures_evict() {
        let driver = ProbeDriver::new();
        let valid = Arc::clone(&driver.valid);
        let closed = Arc::clone(&driver.closed);
        let pool = pool_with_one_idle(driver).await;
        let monitor = monitor_for(&pool);

        valid.store(false, Ordering::Relaxed);
        monitor.liveness_pass().await;
        monitor.liveness_pass().await;

        assert_eq!(pool.size(), 0);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn diagnostic_failure_evicts_and_replaces_below_min() {
        let driver = ProbeDriver::new();
        let valid = Arc::clone(&driver.valid);
        let pool = ConnectionPool::new(driver, quiet_config().with_min_size(1))
            .await
            .unwrap();
        let guard = pool.acquire().await.unwrap();
        pool.release(guard).await.unwrap();
        let monitor = monitor_for(&pool);

        valid.store(false, Ordering::Relaxed);
        monitor.diagnostic_pass().await;
        valid.store(true, Ordering::Relaxed);
        // Replacement is created inline by the eviction path.
        assert_eq!(pool.size(), 1);

        let replacement = pool.acquire().await.unwrap();
        assert_eq!(*replacement, 1, "replacement is a fresh resource");
        drop(replacement);
    }

    #[tokio::test]
    async fn degraded_resource_recovers_in_place() {
        let driver = ProbeDriver::new();
        let degraded = Arc::clone(&driver.degraded);
        let recoverable = Arc::clone(&driver.recoverable);
        let closed = Arc::clone(&driver.closed);
        let pool = pool_with_one_idle(driver).await;
        let monitor = monitor_for(&pool);

        degraded.store(true, Ordering::Relaxed);
        recoverable.store(true, Ordering::Relaxed);
        monitor.diagnostic_pass().await;

        // Same slot survives, nothing was closed.
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 1);
        assert_eq!(closed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unrecoverable_degraded_resource_is_evicted() {
        let driver = ProbeDriver::new();
        let degraded = Arc::clone(&driver.degraded);
        let closed = Arc::clone(&driver.closed);
        let pool = pool_with_one_idle(driver).await;
        let monitor = monitor_for(&pool);

        degraded.store(true, Ordering::Relaxed);
        monitor.diagnostic_pass().await;

        assert_eq!(pool.size(), 0);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn idle_timeout_expires_entries() {
        let driver = ProbeDriver::new();
        let pool = ConnectionPool::new(
            driver,
            quiet_config().with_idle_timeout(Duration::from_millis(10)),
        )
        .await
        .unwrap();
        let guard = pool.acquire().await.unwrap();
        pool.release(guard).await.unwrap();
        let monitor = monitor_for(&pool);

        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.expiry_pass().await;

        assert_eq!(pool.size(), 0);
    }

    struct HeavyDriver {
        serial: AtomicU64,
        weight: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ResourceDriver for HeavyDriver {
        type Resource = u64;
        type Error = ProbeFailure;

        async fn create(&self) -> Result<u64, ProbeFailure> {
            Ok(self.serial.fetch_add(1, Ordering::Relaxed))
        }

        async fn validate(&self, _resource: &u64) -> bool {
            true
        }

        async fn close(&self, _resource: u64) {}

        fn memory_usage(&self, _resource: &u64) -> u64 {
            self.weight.load(Ordering::Relaxed)
        }
    }

    #[tokio::test]
    async fn memory_pressure_evicts_idle_and_gates_acquire() {
        let weight = Arc::new(AtomicU64::new(10));
        let driver = HeavyDriver {
            serial: AtomicU64::new(0),
            weight: Arc::clone(&weight),
        };
        let pool = ConnectionPool::new(
            driver,
            quiet_config().with_max_size(4).with_memory_limits(25, 50),
        )
        .await
        .unwrap();
        let monitor = monitor_for(&pool);

        // Two idle resources at 10 bytes each: under the soft limit.
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(a).await.unwrap();
        pool.release(b).await.unwrap();
        monitor.memory_pass().await;
        assert_eq!(pool.size(), 2);

        // Resources balloon to 30 bytes each: 60 total crosses the hard
        // limit; the pass evicts idles down to the soft limit.
        weight.store(30, Ordering::Relaxed);
        monitor.memory_pass().await;
        assert!(pool.stats().tracked_memory_bytes <= 25);

        // Gate cleared once back under the soft limit.
        let guard = pool.acquire().await;
        assert!(guard.is_ok());
        drop(guard);
    }

    #[tokio::test]
    async fn hard_limit_gates_acquire_until_pressure_drops() {
        let weight = Arc::new(AtomicU64::new(60));
        let driver = HeavyDriver {
            serial: AtomicU64::new(0),
            weight: Arc::clone(&weight),
        };
        let pool = ConnectionPool::new(
            driver,
            quiet_config().with_max_size(4).with_memory_limits(25, 50),
        )
        .await
        .unwrap();
        let monitor = monitor_for(&pool);

        // One checked-out resource at 60 bytes: over the hard limit and
        // not evictable while in use.
        let guard = pool.acquire().await.unwrap();
        monitor.memory_pass().await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, crate::errors::PoolError::Unhealthy { .. }));

        // Pressure drops; the next pass clears the gate.
        weight.store(10, Ordering::Relaxed);
        pool.release(guard).await.unwrap();
        monitor.memory_pass().await;

        let ok = pool.acquire().await;
        assert!(ok.is_ok());
    }
}
