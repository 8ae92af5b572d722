//! Core pool: the `Pool<T>` port trait, the RAII guard, and the
//! multiplexed connection pool
//!
//! The pool owns the authoritative slot map; checked-out resources are owned
//! exclusively by their guard. Guards return resources through an unbounded
//! channel so the drop path never blocks, never locks, and fires exactly
//! once - including when the owning task is cancelled or panics.

use crate::affinity::AffinityManager;
use crate::batch::{AdaptiveBatchState, BatchBuffer, BatchCommand, BatchResult, BatchSummary};
use crate::circuit_breaker::{BreakerState, CreationBreaker};
use crate::config::PoolConfig;
use crate::driver::{CommandDriver, PoolEvent, ResourceDriver};
use crate::entry::{EntryState, PoolEntry};
use crate::errors::{PoolError, PoolResult};
use crate::health::{CounterTracker, PoolHealth, PoolStats};
use crate::monitor::HealthMonitor;
use crate::wait_queue::{Priority, WaitQueue, Waiter};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Port trait for a bounded pool of reusable resources.
///
/// `acquire` suspends until a resource is available or the deadline elapses;
/// it never creates beyond the configured maximum. All snapshot reads are
/// O(1) and never perform I/O.
#[async_trait]
pub trait Pool<T: Send + 'static>: Send + Sync {
    async fn acquire(&self) -> PoolResult<PooledResource<T>>;

    /// Return a resource explicitly. Equivalent to dropping the guard,
    /// except validation failures surface to the caller.
    async fn release(&self, resource: PooledResource<T>) -> PoolResult<()>;

    fn size(&self) -> usize;
    fn available(&self) -> usize;
    fn in_use(&self) -> usize;
    fn health(&self) -> PoolHealth;
    fn stats(&self) -> PoolStats;
}

/// Message a guard sends back to the pool when it is done.
enum ReleaseMsg<T> {
    Returned { id: u64, resource: T, dirty: bool },
    Retired { id: u64 },
}

/// A pooled resource that automatically returns to the pool when dropped
///
/// Exactly one release per acquire is enforced structurally: the resource
/// travels back over a channel from `Drop`, so cancellation and panic
/// unwinding release it too, and a second release is impossible by
/// construction.
pub struct PooledResource<T> {
    resource: Option<T>,
    id: u64,
    dirty: bool,
    returner: mpsc::UnboundedSender<ReleaseMsg<T>>,
}

impl<T> PooledResource<T> {
    fn new(resource: T, id: u64, returner: mpsc::UnboundedSender<ReleaseMsg<T>>) -> Self {
        Self {
            resource: Some(resource),
            id,
            dirty: false,
            returner,
        }
    }

    /// Stable id of the pool slot backing this resource.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the resource.
    pub fn get(&self) -> &T {
        self.resource.as_ref().expect("resource already taken")
    }

    /// Mutably borrow the resource.
    pub fn get_mut(&mut self) -> &mut T {
        self.resource.as_mut().expect("resource already taken")
    }

    /// Mark the resource as suspect after a mid-use error. The pool will
    /// re-validate it on release instead of blindly requeueing.
    pub fn flag_unhealthy(&mut self) {
        self.dirty = true;
    }

    /// Take the resource out of pool management permanently. The slot is
    /// retired and, if the pool drops below its minimum size, a
    /// replacement is scheduled.
    pub fn into_inner(mut self) -> T {
        let resource = self.resource.take().expect("resource already taken");
        let _ = self.returner.send(ReleaseMsg::Retired { id: self.id });
        resource
    }

    /// Disarm the guard and hand its parts back to the pool internals.
    fn defuse(mut self) -> (u64, T, bool) {
        let resource = self.resource.take().expect("resource already taken");
        (self.id, resource, self.dirty)
    }
}

impl<T> std::fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .field("present", &self.resource.is_some())
            .finish()
    }
}

impl<T> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            // If the pool is gone the send fails and the resource is
            // dropped in place.
            let _ = self.returner.send(ReleaseMsg::Returned {
                id: self.id,
                resource,
                dirty: self.dirty,
            });
        }
    }
}

/// Mutable pool state, serialized behind one async mutex. The lock is never
/// held across driver I/O.
pub(crate) struct PoolState<T> {
    pub(crate) entries: HashMap<u64, PoolEntry<T>>,
    pub(crate) idle: VecDeque<u64>,
    pub(crate) waiters: WaitQueue<PooledResource<T>>,
    pub(crate) creating: usize,
}

enum AcquireRoute<T> {
    Granted(PooledResource<T>),
    Create,
    Wait(u64, oneshot::Receiver<PoolResult<PooledResource<T>>>),
    Reject,
}

pub(crate) struct Shared<D: ResourceDriver> {
    pub(crate) config: PoolConfig,
    pub(crate) driver: D,
    pub(crate) state: Mutex<PoolState<D::Resource>>,
    pub(crate) affinity: AffinityManager,
    pub(crate) counters: CounterTracker,
    breaker: CreationBreaker,
    pub(crate) tracked_memory: AtomicU64,
    pub(crate) memory_gated: AtomicBool,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
    pub(crate) total_count: AtomicUsize,
    pub(crate) idle_count: AtomicUsize,
    pub(crate) in_use_count: AtomicUsize,
    release_tx: mpsc::UnboundedSender<ReleaseMsg<D::Resource>>,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    drained: Notify,
    batches: Mutex<HashMap<String, BatchBuffer>>,
    batch_state: parking_lot::Mutex<AdaptiveBatchState>,
}

impl<D: ResourceDriver> Shared<D> {
    pub(crate) fn emit(&self, event: PoolEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn make_guard(&self, id: u64, resource: D::Resource) -> PooledResource<D::Resource> {
        PooledResource::new(resource, id, self.release_tx.clone())
    }

    fn sync_queue_depth(&self, state: &PoolState<D::Resource>) {
        self.counters
            .queue_depth
            .store(state.waiters.depth(), Ordering::Relaxed);
    }

    /// Hand a freed resource to the best waiter, or park it on the idle
    /// list. Caller holds the lock; the entry must exist and hold no
    /// resource (it is passed in).
    pub(crate) fn dispatch_or_park(
        &self,
        state: &mut PoolState<D::Resource>,
        id: u64,
        resource: D::Resource,
    ) {
        let mut resource = resource;
        loop {
            let Some(waiter) = state.waiters.pop() else {
                let entry = state
                    .entries
                    .get_mut(&id)
                    .expect("dispatching unknown entry");
                entry.resource = Some(resource);
                entry.state = EntryState::Idle;
                state.idle.push_back(id);
                self.idle_count.fetch_add(1, Ordering::Relaxed);
                self.sync_queue_depth(state);
                return;
            };

            let entry = state
                .entries
                .get_mut(&id)
                .expect("dispatching unknown entry");
            entry.state = EntryState::InUse;
            entry.touch();
            let guard = self.make_guard(id, resource);

            match waiter.tx.send(Ok(guard)) {
                Ok(()) => {
                    self.in_use_count.fetch_add(1, Ordering::Relaxed);
                    if let Some(context) = &waiter.context {
                        self.affinity.set(context, id);
                    }
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    self.sync_queue_depth(state);
                    self.emit(PoolEvent::Acquired { id, created: false });
                    debug!(
                        id,
                        priority = ?waiter.priority,
                        waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                        "granted freed resource to waiter"
                    );
                    return;
                }
                Err(rejected) => {
                    // Waiter gave up (timeout or cancellation); take the
                    // resource back and try the next one.
                    let guard = rejected.expect("grant payload is always Ok");
                    let (_, taken, _) = guard.defuse();
                    resource = taken;
                }
            }
        }
    }

    /// Re-admit a resource taken out for validation, closing it instead
    /// when the pool is draining.
    pub(crate) async fn readmit(&self, id: u64, resource: D::Resource) {
        if self.is_shutting_down() {
            self.driver.close(resource).await;
            self.remove_entry(id, "shutdown").await;
            return;
        }
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&id) {
            self.dispatch_or_park(&mut state, id, resource);
        } else {
            drop(state);
            self.driver.close(resource).await;
        }
    }

    /// Drop an entry from the map and fix up counters and hints. The
    /// resource itself must already be closed or owned elsewhere.
    pub(crate) async fn remove_entry(&self, id: u64, reason: &str) {
        let memory = {
            let mut state = self.state.lock().await;
            let had_idle_slot = state.idle.contains(&id);
            state.idle.retain(|&x| x != id);
            match state.entries.remove(&id) {
                Some(entry) => {
                    self.total_count.fetch_sub(1, Ordering::Relaxed);
                    match entry.state {
                        EntryState::Idle if had_idle_slot => {
                            self.idle_count.fetch_sub(1, Ordering::Relaxed);
                        }
                        EntryState::InUse => {
                            self.in_use_count.fetch_sub(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                    entry.memory_bytes
                }
                None => return,
            }
        };
        self.tracked_memory.fetch_sub(memory, Ordering::Relaxed);
        self.update_memory_gate();
        self.affinity.forget_resource(id);
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        self.emit(PoolEvent::Evicted {
            id,
            reason: reason.to_string(),
        });
        self.notify_if_drained();
    }

    pub(crate) fn notify_if_drained(&self) {
        if self.is_shutting_down() && self.total_count.load(Ordering::Relaxed) == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Take an idle entry's resource out for out-of-lock validation.
    pub(crate) async fn take_for_validation(&self, id: u64) -> Option<D::Resource> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get_mut(&id)?;
        if entry.state != EntryState::Idle {
            return None;
        }
        entry.state = EntryState::Validating;
        let resource = entry.resource.take();
        state.idle.retain(|&x| x != id);
        self.idle_count.fetch_sub(1, Ordering::Relaxed);
        resource
    }

    pub(crate) async fn idle_snapshot(&self) -> Vec<u64> {
        let state = self.state.lock().await;
        state.idle.iter().copied().collect()
    }

    pub(crate) fn update_memory_gate(&self) {
        let tracked = self.tracked_memory.load(Ordering::Relaxed);
        if tracked > self.config.hard_memory_limit {
            if !self.memory_gated.swap(true, Ordering::Relaxed) {
                warn!(
                    tracked_bytes = tracked,
                    hard_limit = self.config.hard_memory_limit,
                    "tracked memory crossed the hard limit, failing new acquires"
                );
                self.emit(PoolEvent::Degraded {
                    reason: "tracked memory over hard limit".to_string(),
                });
            }
        } else if tracked <= self.config.soft_memory_limit {
            self.memory_gated.store(false, Ordering::Relaxed);
        }
    }

    /// Create resources until the pool is back at `min_size`. Retries with
    /// linear backoff; gives up after a few attempts and leaves the rest to
    /// the next maintenance pass.
    pub(crate) async fn replenish(&self) {
        let mut failures: u64 = 0;
        loop {
            {
                let mut state = self.state.lock().await;
                if self.is_shutting_down() {
                    return;
                }
                if state.entries.len() + state.creating >= self.config.min_size {
                    return;
                }
                state.creating += 1;
            }

            if !self.breaker.allow_attempt() {
                self.state.lock().await.creating -= 1;
                debug!("creation breaker open, skipping replenishment");
                return;
            }

            match self.driver.create().await {
                Ok(resource) => {
                    self.breaker.record_success();
                    self.install(resource, |state| state.creating -= 1).await;
                }
                Err(e) => {
                    failures += 1;
                    if self.breaker.record_failure() {
                        self.emit(PoolEvent::CreationBreakerOpened {
                            consecutive_failures: self.breaker.consecutive_failures(),
                        });
                    }
                    self.state.lock().await.creating -= 1;
                    warn!(error = %e, attempt = failures, "failed to create replacement resource");
                    if failures >= 3 {
                        error!(
                            failures,
                            "giving up on pool replenishment until the next maintenance pass"
                        );
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100 * failures)).await;
                }
            }
        }
    }

    /// Insert a freshly created resource as an idle (or immediately
    /// dispatched) entry.
    async fn install<F>(&self, resource: D::Resource, fixup: F)
    where
        F: FnOnce(&mut PoolState<D::Resource>),
    {
        let memory = self.driver.memory_usage(&resource);
        let id = self.alloc_id();
        {
            let mut state = self.state.lock().await;
            fixup(&mut state);
            if self.is_shutting_down() {
                drop(state);
                self.driver.close(resource).await;
                return;
            }
            let mut entry = PoolEntry::new(resource, memory);
            let taken = entry.resource.take().expect("fresh entry holds a resource");
            state.entries.insert(id, entry);
            self.total_count.fetch_add(1, Ordering::Relaxed);
            self.dispatch_or_park(&mut state, id, taken);
        }
        self.tracked_memory.fetch_add(memory, Ordering::Relaxed);
        self.update_memory_gate();
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        info!(id, "created pool resource");
    }

    /// Acquire with success/failure accounting.
    pub(crate) async fn acquire_recorded(
        &self,
        context: Option<&str>,
        priority: Priority,
        timeout: Duration,
    ) -> PoolResult<PooledResource<D::Resource>> {
        let started = Instant::now();
        let result = self.acquire_inner(context, priority, timeout, started).await;
        match &result {
            Ok(_) => self
                .counters
                .record_acquire_success(started.elapsed().as_secs_f64() * 1000.0),
            Err(_) => self.counters.record_acquire_failure(),
        }
        result
    }

    async fn acquire_inner(
        &self,
        context: Option<&str>,
        priority: Priority,
        timeout: Duration,
        started: Instant,
    ) -> PoolResult<PooledResource<D::Resource>> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        if self.memory_gated.load(Ordering::Relaxed) {
            return Err(PoolError::Unhealthy {
                reason: "tracked memory over hard limit".to_string(),
            });
        }

        // Affinity hint first: only honored when the hinted slot is idle
        // and healthy right now; it never preempts and never waits.
        if let Some(ctx) = context
            && let Some(hinted) = self.affinity.get(ctx)
        {
            let guard = {
                let mut state = self.state.lock().await;
                match state.entries.get_mut(&hinted) {
                    Some(entry)
                        if entry.state == EntryState::Idle
                            && !entry.is_expired(self.config.max_lifetime) =>
                    {
                        let resource =
                            entry.resource.take().expect("idle entry holds a resource");
                        entry.state = EntryState::InUse;
                        entry.touch();
                        state.idle.retain(|&x| x != hinted);
                        self.idle_count.fetch_sub(1, Ordering::Relaxed);
                        self.in_use_count.fetch_add(1, Ordering::Relaxed);
                        Some(self.make_guard(hinted, resource))
                    }
                    _ => None,
                }
            };
            match guard {
                Some(guard) => {
                    self.affinity.set(ctx, hinted);
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    self.emit(PoolEvent::Acquired {
                        id: hinted,
                        created: false,
                    });
                    debug!(id = hinted, context = ctx, "acquired via session affinity");
                    return Ok(guard);
                }
                None => self.affinity.forget_resource(hinted),
            }
        }

        let mut stale: Vec<(u64, D::Resource, u64)> = Vec::new();
        let route = {
            let mut state = self.state.lock().await;

            let granted = loop {
                let Some(id) = state.idle.pop_front() else {
                    break None;
                };
                self.idle_count.fetch_sub(1, Ordering::Relaxed);
                let entry = state
                    .entries
                    .get_mut(&id)
                    .expect("idle list references unknown entry");
                if entry.is_expired(self.config.max_lifetime)
                    || entry.is_idle_expired(self.config.idle_timeout)
                {
                    let resource = entry.resource.take().expect("idle entry holds a resource");
                    let memory = entry.memory_bytes;
                    state.entries.remove(&id);
                    self.total_count.fetch_sub(1, Ordering::Relaxed);
                    stale.push((id, resource, memory));
                    continue;
                }
                let resource = entry.resource.take().expect("idle entry holds a resource");
                entry.state = EntryState::InUse;
                entry.touch();
                self.in_use_count.fetch_add(1, Ordering::Relaxed);
                break Some(self.make_guard(id, resource));
            };

            match granted {
                Some(guard) => AcquireRoute::Granted(guard),
                None => {
                    if state.entries.len() + state.creating < self.config.max_size {
                        state.creating += 1;
                        AcquireRoute::Create
                    } else {
                        let waiter_id = self.alloc_id();
                        let (tx, rx) = oneshot::channel();
                        let waiter = Waiter {
                            id: waiter_id,
                            context: context.map(str::to_string),
                            priority,
                            enqueued_at: Instant::now(),
                            deadline: started + timeout,
                            tx,
                        };
                        match state.waiters.enqueue(waiter) {
                            Ok(()) => {
                                self.sync_queue_depth(&state);
                                AcquireRoute::Wait(waiter_id, rx)
                            }
                            Err(_) => AcquireRoute::Reject,
                        }
                    }
                }
            }
        };

        for (id, resource, memory) in stale {
            self.driver.close(resource).await;
            self.tracked_memory.fetch_sub(memory, Ordering::Relaxed);
            self.affinity.forget_resource(id);
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            self.emit(PoolEvent::Evicted {
                id,
                reason: "expired".to_string(),
            });
        }

        match route {
            AcquireRoute::Granted(guard) => {
                if let Some(ctx) = context {
                    self.affinity.set(ctx, guard.id());
                }
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                self.emit(PoolEvent::Acquired {
                    id: guard.id(),
                    created: false,
                });
                debug!(id = guard.id(), "reusing idle resource");
                Ok(guard)
            }
            AcquireRoute::Reject => Err(PoolError::Exhausted),
            AcquireRoute::Create => self.create_for_acquire(context, priority, timeout, started).await,
            AcquireRoute::Wait(waiter_id, rx) => {
                debug!(priority = ?priority, "pool saturated, waiting for a free resource");
                let remaining = timeout.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, rx).await {
                    Ok(Ok(Ok(guard))) => Ok(guard),
                    Ok(Ok(Err(e))) => Err(e),
                    // Sender dropped: the queue purged the waiter at its
                    // deadline.
                    Ok(Err(_)) => Err(PoolError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                    Err(_) => {
                        let mut state = self.state.lock().await;
                        state.waiters.remove(waiter_id);
                        self.sync_queue_depth(&state);
                        drop(state);
                        Err(PoolError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    }
                }
            }
        }
    }

    /// Slow path of acquire: a creation slot was reserved under the lock.
    async fn create_for_acquire(
        &self,
        context: Option<&str>,
        priority: Priority,
        timeout: Duration,
        started: Instant,
    ) -> PoolResult<PooledResource<D::Resource>> {
        if !self.breaker.allow_attempt() {
            self.state.lock().await.creating -= 1;
            return Err(PoolError::CreationFailed(
                "creation breaker open after consecutive driver failures".to_string(),
            ));
        }
        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.driver.create()).await {
            Err(_) => {
                self.state.lock().await.creating -= 1;
                Err(PoolError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                if self.breaker.record_failure() {
                    warn!(
                        consecutive = self.breaker.consecutive_failures(),
                        "creation breaker opened"
                    );
                    self.emit(PoolEvent::CreationBreakerOpened {
                        consecutive_failures: self.breaker.consecutive_failures(),
                    });
                }
                self.state.lock().await.creating -= 1;
                Err(PoolError::CreationFailed(e.to_string()))
            }
            Ok(Ok(resource)) => {
                self.breaker.record_success();
                let memory = self.driver.memory_usage(&resource);
                let id = self.alloc_id();
                let guard = {
                    let mut state = self.state.lock().await;
                    state.creating -= 1;
                    if self.is_shutting_down() {
                        drop(state);
                        self.driver.close(resource).await;
                        return Err(PoolError::ShuttingDown);
                    }
                    let mut entry = PoolEntry::new(resource, memory);
                    let taken = entry.resource.take().expect("fresh entry holds a resource");
                    entry.state = EntryState::InUse;
                    entry.touch();
                    state.entries.insert(id, entry);
                    self.total_count.fetch_add(1, Ordering::Relaxed);
                    self.in_use_count.fetch_add(1, Ordering::Relaxed);
                    self.make_guard(id, taken)
                };
                self.tracked_memory.fetch_add(memory, Ordering::Relaxed);
                self.update_memory_gate();
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                if let Some(ctx) = context {
                    self.affinity.set(ctx, id);
                }
                self.emit(PoolEvent::Acquired { id, created: true });
                info!(id, priority = ?priority, "created resource for acquire");
                Ok(guard)
            }
        }
    }

    fn health_snapshot(&self) -> PoolHealth {
        PoolHealth {
            total: self.total_count.load(Ordering::Relaxed),
            available: self.idle_count.load(Ordering::Relaxed),
            in_use: self.in_use_count.load(Ordering::Relaxed),
            failed: self.counters.acquire_failure.load(Ordering::Relaxed),
            success_rate: self.counters.success_rate(),
            avg_acquisition_time_ms: self.counters.avg_acquisition_time_ms(),
            avg_latency_ms: self.counters.avg_latency_ms(),
        }
    }

    fn stats_snapshot(&self) -> PoolStats {
        let in_use = self.in_use_count.load(Ordering::Relaxed);
        let capacity = self.config.max_size;
        PoolStats {
            available: self.idle_count.load(Ordering::Relaxed),
            in_use,
            total_capacity: capacity,
            utilization: if capacity > 0 {
                in_use as f64 / capacity as f64
            } else {
                0.0
            },
            wait_queue_depth: self.counters.queue_depth.load(Ordering::Relaxed),
            tracked_memory_bytes: self.tracked_memory.load(Ordering::Relaxed),
            created_total: self.counters.created.load(Ordering::Relaxed),
            reused_total: self.counters.reused.load(Ordering::Relaxed),
            evicted_total: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Multiplexed connection pool over an external [`ResourceDriver`]
///
/// Composes session affinity, priority wait queueing, adaptive batching,
/// tiered health monitoring, and memory-pressure handling behind the
/// [`Pool`] port trait.
///
/// # Examples
///
/// ```no_run
/// # use muxpool::{ConnectionPool, PoolConfig, Pool, Priority};
/// # use std::convert::Infallible;
/// # struct MyDriver;
/// # #[async_trait::async_trait]
/// # impl muxpool::ResourceDriver for MyDriver {
/// #     type Resource = String;
/// #     type Error = Infallible;
/// #     async fn create(&self) -> Result<String, Infallible> { Ok("session".into()) }
/// #     async fn validate(&self, _: &String) -> bool { true }
/// #     async fn close(&self, _: String) {}
/// # }
/// # async fn demo() -> muxpool::PoolResult<()> {
/// let pool = ConnectionPool::new(MyDriver, PoolConfig::default()).await?;
/// let session = pool.acquire_with(Some("tenant-a"), Priority::High).await?;
/// println!("using {}", *session);
/// drop(session); // returns to the pool
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<D: ResourceDriver> {
    shared: Arc<Shared<D>>,
    events: Arc<Mutex<mpsc::UnboundedReceiver<PoolEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    flusher_started: AtomicBool,
}

impl<D: ResourceDriver> ConnectionPool<D> {
    /// Create a pool, spawn its background tasks, and pre-warm
    /// `initial_size` resources (best effort).
    pub async fn new(driver: D, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wait_queue_max_depth = config.wait_queue_max_depth;

        let shared = Arc::new(Shared {
            affinity: AffinityManager::new(config.affinity_ttl),
            breaker: CreationBreaker::new(
                config.creation_failure_threshold,
                config.creation_breaker_cooldown,
            ),
            batch_state: parking_lot::Mutex::new(AdaptiveBatchState::new(&config)),
            config,
            driver,
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                idle: VecDeque::new(),
                waiters: WaitQueue::new(wait_queue_max_depth),
                creating: 0,
            }),
            counters: CounterTracker::new(),
            tracked_memory: AtomicU64::new(0),
            memory_gated: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            total_count: AtomicUsize::new(0),
            idle_count: AtomicUsize::new(0),
            in_use_count: AtomicUsize::new(0),
            release_tx,
            event_tx,
            drained: Notify::new(),
            batches: Mutex::new(HashMap::new()),
        });

        tokio::spawn(reclaim_task(
            Arc::clone(&shared),
            release_rx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(HealthMonitor::new(Arc::clone(&shared), shutdown_rx).run());

        for _ in 0..shared.config.initial_size {
            match shared.driver.create().await {
                Ok(resource) => shared.install(resource, |_| {}).await,
                Err(e) => warn!(error = %e, "failed to pre-warm pool resource"),
            }
        }

        Ok(Self {
            shared,
            events: Arc::new(Mutex::new(event_rx)),
            shutdown_tx,
            flusher_started: AtomicBool::new(false),
        })
    }

    /// Acquire with a context hint and priority, using the pool-default
    /// deadline.
    pub async fn acquire_with(
        &self,
        context: Option<&str>,
        priority: Priority,
    ) -> PoolResult<PooledResource<D::Resource>> {
        self.shared
            .acquire_recorded(context, priority, self.shared.config.acquire_timeout)
            .await
    }

    /// Acquire with a caller-supplied deadline.
    pub async fn acquire_with_deadline(
        &self,
        context: Option<&str>,
        priority: Priority,
        timeout: Duration,
    ) -> PoolResult<PooledResource<D::Resource>> {
        self.shared.acquire_recorded(context, priority, timeout).await
    }

    /// Receiver for lifecycle events. There is a single receiver; the
    /// consumer owns draining it.
    pub fn events(&self) -> Arc<Mutex<mpsc::UnboundedReceiver<PoolEvent>>> {
        Arc::clone(&self.events)
    }

    /// Current state of the creation breaker.
    pub fn breaker_state(&self) -> BreakerState {
        self.shared.breaker.state()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared<D>> {
        &self.shared
    }

    /// Drain the pool: cancel background tasks, fail queued waiters, close
    /// idle resources now and in-use resources as their guards return.
    /// Resolves once every entry is closed.
    pub async fn shutdown(&self) -> PoolResult<()> {
        if self.shared.shutting_down.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        info!("shutting down pool");
        let _ = self.shutdown_tx.send(true);

        let (waiters, to_close) = {
            let mut state = self.shared.state.lock().await;
            let waiters = state.waiters.drain();
            self.shared.sync_queue_depth(&state);
            let mut resources = Vec::new();
            while let Some(id) = state.idle.pop_front() {
                self.shared.idle_count.fetch_sub(1, Ordering::Relaxed);
                if let Some(mut entry) = state.entries.remove(&id) {
                    self.shared.total_count.fetch_sub(1, Ordering::Relaxed);
                    if let Some(resource) = entry.resource.take() {
                        resources.push((id, resource, entry.memory_bytes));
                    }
                }
            }
            (waiters, resources)
        };

        for waiter in waiters {
            let _ = waiter.tx.send(Err(PoolError::ShuttingDown));
        }
        for (id, resource, memory) in to_close {
            self.shared.driver.close(resource).await;
            self.shared
                .tracked_memory
                .fetch_sub(memory, Ordering::Relaxed);
            self.shared.counters.evicted.fetch_add(1, Ordering::Relaxed);
            self.shared.emit(PoolEvent::Evicted {
                id,
                reason: "shutdown".to_string(),
            });
        }

        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            // Register before checking so a concurrent notify cannot be
            // missed between the check and the await.
            drained.as_mut().enable();
            if self.shared.total_count.load(Ordering::Relaxed) == 0 {
                break;
            }
            drained.await;
        }

        self.shared.emit(PoolEvent::ShutdownComplete);
        info!("pool shutdown complete");
        Ok(())
    }
}

#[async_trait]
impl<D: ResourceDriver> Pool<D::Resource> for ConnectionPool<D> {
    async fn acquire(&self) -> PoolResult<PooledResource<D::Resource>> {
        self.acquire_with(None, Priority::Normal).await
    }

    async fn release(&self, resource: PooledResource<D::Resource>) -> PoolResult<()> {
        let (id, resource, dirty) = resource.defuse();
        release_inner(&self.shared, id, resource, dirty).await
    }

    fn size(&self) -> usize {
        self.shared.total_count.load(Ordering::Relaxed)
    }

    fn available(&self) -> usize {
        self.shared.idle_count.load(Ordering::Relaxed)
    }

    fn in_use(&self) -> usize {
        self.shared.in_use_count.load(Ordering::Relaxed)
    }

    fn health(&self) -> PoolHealth {
        self.shared.health_snapshot()
    }

    fn stats(&self) -> PoolStats {
        self.shared.stats_snapshot()
    }
}

impl<D: CommandDriver> ConnectionPool<D> {
    /// Buffer a command for batched execution against the context's
    /// resource. Returns the batch summary when this submission filled the
    /// batch and triggered a flush.
    pub async fn submit_command(
        &self,
        context: &str,
        command: BatchCommand,
    ) -> PoolResult<Option<BatchSummary>> {
        if self.shared.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        self.ensure_flusher();

        let flush_now = {
            let mut batches = self.shared.batches.lock().await;
            let buffer = batches
                .entry(context.to_string())
                .or_insert_with(BatchBuffer::new);
            buffer.push(command);
            buffer.len() >= self.shared.batch_state.lock().batch_size()
        };

        if flush_now {
            Ok(Some(self.batch_execute(context).await?))
        } else {
            Ok(None)
        }
    }

    /// Flush the context's buffer and execute it against one acquired
    /// resource, returning the aggregated summary.
    pub async fn batch_execute(&self, context: &str) -> PoolResult<BatchSummary> {
        flush_context(&self.shared, context).await
    }

    /// Spawn the background flush timer on first use. Drains buffers whose
    /// oldest command has aged past the adaptive timeout; cancelled at
    /// shutdown.
    fn ensure_flusher(&self) {
        if self.flusher_started.swap(true, Ordering::Relaxed) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let tick = shared.config.batch_min_timeout.max(Duration::from_millis(5));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {
                        let due: Vec<String> = {
                            let batches = shared.batches.lock().await;
                            let threshold = shared.batch_state.lock().flush_timeout();
                            batches
                                .iter()
                                .filter(|(_, b)| {
                                    b.oldest_age().map(|age| age >= threshold).unwrap_or(false)
                                })
                                .map(|(ctx, _)| ctx.clone())
                                .collect()
                        };
                        for context in due {
                            if let Err(e) = flush_context(&shared, &context).await {
                                warn!(context = %context, error = %e, "timed batch flush failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("batch flusher stopped");
                        return;
                    }
                }
            }
        });
    }
}

/// Flush and execute the pending commands for one context.
async fn flush_context<D: CommandDriver>(
    shared: &Arc<Shared<D>>,
    context: &str,
) -> PoolResult<BatchSummary> {
    let commands = {
        let mut batches = shared.batches.lock().await;
        match batches.get_mut(context) {
            Some(buffer) => buffer.drain(),
            None => Vec::new(),
        }
    };
    if commands.is_empty() {
        return Ok(BatchSummary {
            total: 0,
            succeeded: 0,
            failed: 0,
            elapsed_ms: 0,
            results: Vec::new(),
        });
    }

    let guard = match shared
        .acquire_recorded(Some(context), Priority::Normal, shared.config.acquire_timeout)
        .await
    {
        Ok(guard) => guard,
        Err(e) => {
            // Re-buffer in front so submission order is preserved for the
            // next flush attempt.
            let mut batches = shared.batches.lock().await;
            let buffer = batches
                .entry(context.to_string())
                .or_insert_with(BatchBuffer::new);
            let existing = buffer.drain();
            for command in commands.into_iter().chain(existing) {
                buffer.push(command);
            }
            return Err(e);
        }
    };

    let summary = execute_batch(shared, guard.get(), commands).await;
    shared.batch_state.lock().adapt(&summary);
    info!(
        context = %context,
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        elapsed_ms = summary.elapsed_ms,
        "batch execution completed"
    );
    drop(guard);
    Ok(summary)
}

/// Execute commands grouped by category: independent categories run
/// concurrently, commands within a category run strictly in submission
/// order.
async fn execute_batch<D: CommandDriver>(
    shared: &Arc<Shared<D>>,
    resource: &D::Resource,
    commands: Vec<BatchCommand>,
) -> BatchSummary {
    let started = Instant::now();
    let per_command_budget = shared.batch_state.lock().flush_timeout() * 2;

    let mut groups: Vec<(String, Vec<BatchCommand>)> = Vec::new();
    for command in commands {
        match groups.iter_mut().find(|(cat, _)| *cat == command.category) {
            Some((_, group)) => group.push(command),
            None => groups.push((command.category.clone(), vec![command])),
        }
    }

    let group_futures = groups.into_iter().map(|(_, group)| async move {
        let mut results = Vec::with_capacity(group.len());
        for command in group {
            let command_started = Instant::now();
            let outcome =
                tokio::time::timeout(per_command_budget, shared.driver.execute(resource, &command))
                    .await;
            let elapsed = command_started.elapsed();
            shared
                .counters
                .record_latency(elapsed.as_secs_f64() * 1000.0);
            results.push(match outcome {
                Ok(Ok(value)) => BatchResult {
                    name: command.name,
                    success: true,
                    result: Some(value),
                    error: None,
                    elapsed_ms: elapsed.as_millis() as u64,
                },
                Ok(Err(e)) => BatchResult {
                    name: command.name,
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    elapsed_ms: elapsed.as_millis() as u64,
                },
                Err(_) => BatchResult {
                    name: command.name,
                    success: false,
                    result: None,
                    error: Some("timeout".to_string()),
                    elapsed_ms: elapsed.as_millis() as u64,
                },
            });
        }
        results
    });

    let results: Vec<BatchResult> = futures::future::join_all(group_futures)
        .await
        .into_iter()
        .flatten()
        .collect();

    let succeeded = results.iter().filter(|r| r.success).count();
    BatchSummary {
        total: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        elapsed_ms: started.elapsed().as_millis() as u64,
        results,
    }
}

/// Kick off background replenishment when the pool is under its minimum.
/// The spawned task re-checks under the lock, so concurrent calls cannot
/// over-create.
fn schedule_replenish<D: ResourceDriver>(shared: &Arc<Shared<D>>) {
    if shared.total_count.load(Ordering::Relaxed) < shared.config.min_size
        && !shared.is_shutting_down()
    {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            shared.replenish().await;
        });
    }
}

/// The release path shared by guard drops and explicit `release`.
async fn release_inner<D: ResourceDriver>(
    shared: &Arc<Shared<D>>,
    id: u64,
    resource: D::Resource,
    dirty: bool,
) -> PoolResult<()> {
    if shared.is_shutting_down() {
        shared.driver.close(resource).await;
        shared.remove_entry(id, "shutdown").await;
        return Ok(());
    }

    let expired = {
        let state = shared.state.lock().await;
        state
            .entries
            .get(&id)
            .map(|e| e.is_expired(shared.config.max_lifetime))
            .unwrap_or(true)
    };

    let mut valid = true;
    if !expired && (dirty || shared.config.validate_on_release) {
        valid = shared.driver.validate(&resource).await;
    }

    if expired || !valid {
        shared.driver.close(resource).await;
        let reason = if expired {
            "lifetime expired"
        } else {
            "failed validation on release"
        };
        shared.remove_entry(id, reason).await;
        schedule_replenish(shared);
        if !valid {
            return Err(PoolError::ValidationFailed(reason.to_string()));
        }
        return Ok(());
    }

    let memory = shared.driver.memory_usage(&resource);
    {
        let mut state = shared.state.lock().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            drop(state);
            shared.driver.close(resource).await;
            return Ok(());
        };
        shared.in_use_count.fetch_sub(1, Ordering::Relaxed);
        let previous = entry.memory_bytes;
        entry.memory_bytes = memory;
        entry.last_used = Instant::now();
        shared.tracked_memory.fetch_add(memory, Ordering::Relaxed);
        shared.tracked_memory.fetch_sub(previous, Ordering::Relaxed);
        shared.dispatch_or_park(&mut state, id, resource);
    }
    shared.update_memory_gate();
    shared.emit(PoolEvent::Released { id });
    debug!(id, "released resource to pool");
    Ok(())
}

/// Retire a slot whose resource the caller took out of pool management.
async fn retire<D: ResourceDriver>(shared: &Arc<Shared<D>>, id: u64) {
    shared.remove_entry(id, "detached by caller").await;
    schedule_replenish(shared);
}

/// Consumes guard returns. Runs until the pool handle is dropped and the
/// buffered returns are drained.
async fn reclaim_task<D: ResourceDriver>(
    shared: Arc<Shared<D>>,
    mut rx: mpsc::UnboundedReceiver<ReleaseMsg<D::Resource>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => handle_release(&shared, msg).await,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Pool handle dropped; close whatever is buffered and
                    // stop.
                    while let Ok(msg) = rx.try_recv() {
                        handle_release(&shared, msg).await;
                    }
                    break;
                }
                // Shutdown flag flipped; keep consuming returns so the
                // drain completes.
            }
        }
    }
    debug!("reclaim task stopped");
}

async fn handle_release<D: ResourceDriver>(shared: &Arc<Shared<D>>, msg: ReleaseMsg<D::Resource>) {
    match msg {
        ReleaseMsg::Returned {
            id,
            resource,
            dirty,
        } => {
            if let Err(e) = release_inner(shared, id, resource, dirty).await {
                debug!(id, error = %e, "dropped guard failed release validation");
            }
        }
        ReleaseMsg::Retired { id } => retire(shared, id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TestDriver {
        serial: AtomicU64,
        closed: Arc<AtomicUsize>,
        fail_creates: Arc<AtomicBool>,
        valid: Arc<AtomicBool>,
    }

    impl TestDriver {
        fn new() -> Self {
            Self {
                serial: AtomicU64::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
                fail_creates: Arc::new(AtomicBool::new(false)),
                valid: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("driver offline")]
    struct DriverOffline;

    #[async_trait]
    impl ResourceDriver for TestDriver {
        type Resource = u64;
        type Error = DriverOffline;

        async fn create(&self) -> Result<u64, DriverOffline> {
            if self.fail_creates.load(Ordering::Relaxed) {
                return Err(DriverOffline);
            }
            Ok(self.serial.fetch_add(1, Ordering::Relaxed))
        }

        async fn validate(&self, _resource: &u64) -> bool {
            self.valid.load(Ordering::Relaxed)
        }

        async fn close(&self, _resource: u64) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn quick_config() -> PoolConfig {
        PoolConfig::new()
            .with_min_size(0)
            .with_max_size(2)
            .with_acquire_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn acquire_and_explicit_release() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        let guard = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.in_use(), 1);

        pool.release(guard).await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn drop_returns_to_pool() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        {
            let _guard = pool.acquire().await.unwrap();
        }
        // Drop travels through the reclaim task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn never_exceeds_max_size() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));
        assert_eq!(pool.size(), 2);

        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn waiter_is_served_on_release() {
        let pool = Arc::new(
            ConnectionPool::new(
                TestDriver::new(),
                quick_config()
                    .with_max_size(1)
                    .with_acquire_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap(),
        );

        let guard = pool.acquire().await.unwrap();
        let waiter_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let granted = waiter.await.unwrap().unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(granted);
    }

    #[tokio::test]
    async fn affinity_prefers_previous_resource() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config().with_max_size(4))
            .await
            .unwrap();

        let first = pool
            .acquire_with(Some("host-a"), Priority::Normal)
            .await
            .unwrap();
        let id = first.id();
        pool.release(first).await.unwrap();

        let again = pool
            .acquire_with(Some("host-a"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(again.id(), id);
        drop(again);
    }

    #[tokio::test]
    async fn affinity_falls_back_when_hint_busy() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config().with_max_size(4))
            .await
            .unwrap();

        let first = pool
            .acquire_with(Some("host-a"), Priority::Normal)
            .await
            .unwrap();
        let hinted = first.id();

        // Hint targets an in-use resource; acquire must not block on it.
        let second = pool
            .acquire_with(Some("host-a"), Priority::Normal)
            .await
            .unwrap();
        assert_ne!(second.id(), hinted);

        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn creation_failure_surfaces_and_breaker_trips() {
        let driver = TestDriver::new();
        driver.fail_creates.store(true, Ordering::Relaxed);
        let pool = ConnectionPool::new(
            driver,
            quick_config().with_creation_breaker(2, Duration::from_secs(60)),
        )
        .await
        .unwrap();

        for _ in 0..2 {
            let err = pool.acquire().await.unwrap_err();
            assert!(matches!(err, PoolError::CreationFailed(_)));
        }
        // Breaker now open: the failure is immediate and does not hit the
        // driver.
        assert_eq!(pool.breaker_state(), BreakerState::Open);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::CreationFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn flagged_guard_is_revalidated_and_evicted() {
        let driver = TestDriver::new();
        let closed = Arc::clone(&driver.closed);
        let valid = Arc::clone(&driver.valid);
        let pool = ConnectionPool::new(driver, quick_config()).await.unwrap();

        let mut guard = pool.acquire().await.unwrap();
        guard.flag_unhealthy();
        valid.store(false, Ordering::Relaxed);

        let err = pool.release(guard).await.unwrap_err();
        assert!(matches!(err, PoolError::ValidationFailed(_)));
        assert_eq!(pool.size(), 0);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn into_inner_retires_slot() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        let guard = pool.acquire().await.unwrap();
        let raw = guard.into_inner();
        assert_eq!(raw, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_acquires() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        let guard = pool.acquire().await.unwrap();
        pool.release(guard).await.unwrap();

        pool.shutdown().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_grant() {
        let pool = Arc::new(
            ConnectionPool::new(
                TestDriver::new(),
                quick_config()
                    .with_max_size(1)
                    .with_acquire_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap(),
        );

        let guard = pool.acquire().await.unwrap();

        // This waiter times out and abandons its queue slot.
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));

        // Releasing afterwards must park the resource, not strand it on
        // the dead waiter.
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.available(), 1);

        let again = pool.acquire().await.unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn health_snapshot_reflects_counters() {
        let pool = ConnectionPool::new(TestDriver::new(), quick_config())
            .await
            .unwrap();

        let guard = pool.acquire().await.unwrap();
        pool.release(guard).await.unwrap();

        let health = pool.health();
        assert_eq!(health.total, 1);
        assert_eq!(health.available, 1);
        assert_eq!(health.in_use, 0);
        assert!(health.is_healthy());

        let stats = pool.stats();
        assert_eq!(stats.created_total, 1);
        assert_eq!(stats.total_capacity, 2);
    }
}
