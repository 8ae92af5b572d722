//! End-to-end pool behavior under concurrent load

use async_trait::async_trait;
use muxpool::{
    BatchCommand, ConnectionPool, Pool, PoolConfig, PoolError, PoolEvent, Priority, ResourceDriver,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct SessionDriver {
    serial: AtomicU64,
    closed: Arc<AtomicUsize>,
}

impl SessionDriver {
    fn new() -> Self {
        Self {
            serial: AtomicU64::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("session backend unavailable")]
struct BackendDown;

#[async_trait]
impl ResourceDriver for SessionDriver {
    type Resource = u64;
    type Error = BackendDown;

    async fn create(&self) -> Result<u64, BackendDown> {
        Ok(self.serial.fetch_add(1, Ordering::Relaxed))
    }

    async fn validate(&self, _resource: &u64) -> bool {
        true
    }

    async fn close(&self, _resource: u64) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

fn config(max_size: usize) -> PoolConfig {
    PoolConfig::new()
        .with_min_size(0)
        .with_max_size(max_size)
        .with_acquire_timeout(Duration::from_secs(2))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn live_guards_never_exceed_max_size() {
    let pool = Arc::new(
        ConnectionPool::new(SessionDriver::new(), config(3))
            .await
            .unwrap(),
    );
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pool = Arc::clone(&pool);
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let guard = pool.acquire().await.unwrap();
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.size() <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_waiter_is_served_first() {
    let pool = Arc::new(
        ConnectionPool::new(SessionDriver::new(), config(1))
            .await
            .unwrap(),
    );
    let guard = pool.acquire().await.unwrap();

    let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut handles = Vec::new();
    for (priority, label) in [
        (Priority::Low, "low"),
        (Priority::Critical, "critical"),
        (Priority::Normal, "normal"),
    ] {
        let pool = Arc::clone(&pool);
        let order_tx = order_tx.clone();
        handles.push(tokio::spawn(async move {
            let granted = pool.acquire_with(None, priority).await.unwrap();
            order_tx.send(label).unwrap();
            drop(granted);
        }));
        // Enqueue order is part of the property under test.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    drop(guard);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(order_rx.recv().await, Some("critical"));
    assert_eq!(order_rx.recv().await, Some("normal"));
    assert_eq!(order_rx.recv().await, Some("low"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn equal_priority_waiters_served_oldest_first() {
    let pool = Arc::new(
        ConnectionPool::new(SessionDriver::new(), config(1))
            .await
            .unwrap(),
    );
    let guard = pool.acquire().await.unwrap();

    let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut handles = Vec::new();
    for label in ["first", "second", "third"] {
        let pool = Arc::clone(&pool);
        let order_tx = order_tx.clone();
        handles.push(tokio::spawn(async move {
            let granted = pool.acquire_with(None, Priority::Normal).await.unwrap();
            order_tx.send(label).unwrap();
            drop(granted);
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    drop(guard);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(order_rx.recv().await, Some("first"));
    assert_eq!(order_rx.recv().await, Some("second"));
    assert_eq!(order_rx.recv().await, Some("third"));
}

#[tokio::test]
async fn saturated_pool_times_out_within_deadline() {
    let pool = ConnectionPool::new(
        SessionDriver::new(),
        config(1).with_acquire_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();

    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, PoolError::Timeout { timeout_ms: 200 }));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(500), "timed out late: {elapsed:?}");
}

#[tokio::test]
async fn wait_queue_depth_limit_fails_fast() {
    let pool = Arc::new(
        ConnectionPool::new(
            SessionDriver::new(),
            config(1).with_wait_queue_max_depth(1),
        )
        .await
        .unwrap(),
    );

    let _held = pool.acquire().await.unwrap();

    let waiting_pool = Arc::clone(&pool);
    let _waiter =
        tokio::spawn(async move { waiting_pool.acquire().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Queue is at depth 1; the next acquire is rejected immediately.
    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn affinity_survives_release_cycles() {
    let pool = ConnectionPool::new(SessionDriver::new(), config(4))
        .await
        .unwrap();

    let mut last_id = None;
    for _ in 0..5 {
        let session = pool
            .acquire_with(Some("tenant-7"), Priority::Normal)
            .await
            .unwrap();
        if let Some(expected) = last_id {
            assert_eq!(session.id(), expected);
        }
        last_id = Some(session.id());
        pool.release(session).await.unwrap();
    }
}

#[tokio::test]
async fn lifecycle_events_are_emitted() {
    let pool = ConnectionPool::new(SessionDriver::new(), config(2))
        .await
        .unwrap();
    let events = pool.events();

    let guard = pool.acquire().await.unwrap();
    pool.release(guard).await.unwrap();
    let guard = pool.acquire().await.unwrap();
    pool.release(guard).await.unwrap();
    pool.shutdown().await.unwrap();

    let mut seen = Vec::new();
    {
        let mut rx = events.lock().await;
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
    }

    assert!(matches!(seen[0], PoolEvent::Acquired { created: true, .. }));
    assert!(matches!(seen[1], PoolEvent::Released { .. }));
    assert!(matches!(seen[2], PoolEvent::Acquired { created: false, .. }));
    assert!(
        seen.iter()
            .any(|e| matches!(e, PoolEvent::Evicted { .. })),
        "shutdown closes the idle resource"
    );
    assert!(
        matches!(seen.last(), Some(PoolEvent::ShutdownComplete)),
        "drain completion is the final event"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_fails_queued_waiters_and_drains() {
    let driver = SessionDriver::new();
    let closed = Arc::clone(&driver.closed);
    let pool = Arc::new(ConnectionPool::new(driver, config(1)).await.unwrap());

    let guard = pool.acquire().await.unwrap();
    let waiting_pool = Arc::clone(&pool);
    let waiter = tokio::spawn(async move { waiting_pool.acquire().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutdown_pool = Arc::clone(&pool);
    let shutdown = tokio::spawn(async move { shutdown_pool.shutdown().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::ShuttingDown));

    // Shutdown resolves once the outstanding guard returns.
    drop(guard);
    shutdown.await.unwrap().unwrap();
    assert_eq!(pool.size(), 0);
    assert_eq!(closed.load(Ordering::Relaxed), 1);
}

struct ScriptedDriver {
    serial: AtomicU64,
}

#[async_trait]
impl ResourceDriver for ScriptedDriver {
    type Resource = u64;
    type Error = BackendDown;

    async fn create(&self) -> Result<u64, BackendDown> {
        Ok(self.serial.fetch_add(1, Ordering::Relaxed))
    }

    async fn validate(&self, _resource: &u64) -> bool {
        true
    }

    async fn close(&self, _resource: u64) {}
}

#[async_trait]
impl muxpool::CommandDriver for ScriptedDriver {
    async fn execute(
        &self,
        resource: &u64,
        command: &BatchCommand,
    ) -> Result<serde_json::Value, BackendDown> {
        if command.name == "explode" {
            return Err(BackendDown);
        }
        Ok(serde_json::json!({
            "command": command.name,
            "session": resource,
        }))
    }
}

#[tokio::test]
async fn batch_flushes_on_size_threshold() {
    let pool = ConnectionPool::new(
        ScriptedDriver {
            serial: AtomicU64::new(0),
        },
        config(2).with_batch_size_bounds(3, 10),
    )
    .await
    .unwrap();

    let mut summary = None;
    for i in 0..3 {
        let result = pool
            .submit_command(
                "tenant-a",
                BatchCommand::new(format!("cmd-{i}"), "navigation", serde_json::json!({})),
            )
            .await
            .unwrap();
        if result.is_some() {
            summary = result;
        }
    }

    let summary = summary.expect("third submission fills the batch");
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn batch_aggregates_failures_and_preserves_order() {
    let pool = ConnectionPool::new(
        ScriptedDriver {
            serial: AtomicU64::new(0),
        },
        config(2).with_batch_size_bounds(2, 20),
    )
    .await
    .unwrap();

    // Same category: dependent commands, strict submission order.
    let mut flushed = None;
    for name in ["step-1", "explode", "step-2"] {
        let result = pool
            .submit_command(
                "tenant-b",
                BatchCommand::new(name, "script", serde_json::json!({})),
            )
            .await
            .unwrap();
        if result.is_some() {
            flushed = result;
        }
    }

    // The second submission filled the batch (min size 2).
    let summary = flushed.expect("size threshold flush");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let names: Vec<&str> = summary.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["step-1", "explode"]);
    assert!(summary.results[1].error.is_some());

    // The trailing command flushes explicitly.
    let rest = pool.batch_execute("tenant-b").await.unwrap();
    assert_eq!(rest.total, 1);
    assert_eq!(rest.results[0].name, "step-2");
    assert_eq!(rest.failed, 0);
}

#[tokio::test]
async fn batch_timed_flush_drains_stale_buffer() {
    let pool = ConnectionPool::new(
        ScriptedDriver {
            serial: AtomicU64::new(0),
        },
        config(2)
            .with_batch_size_bounds(10, 20)
            .with_batch_timeout_bounds(Duration::from_millis(20), Duration::from_millis(40)),
    )
    .await
    .unwrap();

    let pending = pool
        .submit_command(
            "tenant-c",
            BatchCommand::new("lonely", "navigation", serde_json::json!({})),
        )
        .await
        .unwrap();
    assert!(pending.is_none(), "single command stays buffered");

    // The background flusher fires once the command ages past the window.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let summary = pool.batch_execute("tenant-c").await.unwrap();
    assert_eq!(summary.total, 0, "buffer already drained by the timer");
}
