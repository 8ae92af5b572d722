//! Advanced features: session affinity, adaptive batching, events

use async_trait::async_trait;
use muxpool::{
    BatchCommand, CommandDriver, ConnectionPool, Pool, PoolConfig, PoolEvent, Priority,
    ResourceDriver,
};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct BrowserDriver {
    serial: AtomicU64,
}

#[async_trait]
impl ResourceDriver for BrowserDriver {
    type Resource = u64;
    type Error = Infallible;

    async fn create(&self) -> Result<u64, Infallible> {
        Ok(self.serial.fetch_add(1, Ordering::Relaxed))
    }

    async fn validate(&self, _session: &u64) -> bool {
        true
    }

    async fn close(&self, _session: u64) {}
}

#[async_trait]
impl CommandDriver for BrowserDriver {
    async fn execute(
        &self,
        session: &u64,
        command: &BatchCommand,
    ) -> Result<serde_json::Value, Infallible> {
        Ok(serde_json::json!({
            "session": session,
            "command": command.name,
            "params": command.params,
        }))
    }
}

#[tokio::main]
async fn main() -> muxpool::PoolResult<()> {
    println!("=== muxpool - Advanced Features ===\n");

    let config = PoolConfig::new()
        .with_max_size(4)
        .with_affinity_ttl(Duration::from_secs(60))
        .with_batch_size_bounds(2, 10);
    let pool = ConnectionPool::new(BrowserDriver { serial: AtomicU64::new(0) }, config).await?;
    let events = pool.events();

    // 1. Session affinity: the same context keeps hitting the same session.
    println!("1. Session Affinity:");
    for round in 0..3 {
        let session = pool
            .acquire_with(Some("shop.example.com"), Priority::Normal)
            .await?;
        println!("   round {round}: session {}", session.id());
        pool.release(session).await?;
    }

    // 2. Adaptive batching: commands buffer per context and flush as one
    //    round trip.
    println!("\n2. Adaptive Batching:");
    let buffered = pool
        .submit_command(
            "shop.example.com",
            BatchCommand::new("navigate", "navigation", serde_json::json!({"url": "/cart"})),
        )
        .await?;
    assert!(buffered.is_none(), "first command only buffers");
    let summary = pool
        .submit_command(
            "shop.example.com",
            BatchCommand::new("screenshot", "capture", serde_json::json!({})),
        )
        .await?
        .expect("second command fills the batch");
    println!(
        "   batch: total={} succeeded={} in {}ms",
        summary.total, summary.succeeded, summary.elapsed_ms
    );

    // 3. Lifecycle events.
    println!("\n3. Lifecycle Events:");
    {
        let mut rx = events.lock().await;
        while let Ok(event) = rx.try_recv() {
            match event {
                PoolEvent::Acquired { id, created } => {
                    println!("   acquired {id} (created: {created})")
                }
                PoolEvent::Released { id } => println!("   released {id}"),
                PoolEvent::Evicted { id, reason } => println!("   evicted {id}: {reason}"),
                other => println!("   {other:?}"),
            }
        }
    }

    pool.shutdown().await?;
    println!("\nDone");
    Ok(())
}
