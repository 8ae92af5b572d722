//! Concurrent usage: contention, priorities, timeouts

use async_trait::async_trait;
use muxpool::{ConnectionPool, Pool, PoolConfig, PoolError, Priority, ResourceDriver};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct ConnDriver {
    serial: AtomicU64,
}

#[async_trait]
impl ResourceDriver for ConnDriver {
    type Resource = u64;
    type Error = Infallible;

    async fn create(&self) -> Result<u64, Infallible> {
        // Expensive resources take a moment to come up.
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(self.serial.fetch_add(1, Ordering::Relaxed))
    }

    async fn validate(&self, _conn: &u64) -> bool {
        true
    }

    async fn close(&self, _conn: u64) {}
}

#[tokio::main]
async fn main() -> muxpool::PoolResult<()> {
    println!("=== muxpool - Concurrent Usage ===\n");

    let config = PoolConfig::new()
        .with_max_size(3)
        .with_acquire_timeout(Duration::from_secs(2));
    let pool = Arc::new(ConnectionPool::new(ConnDriver { serial: AtomicU64::new(0) }, config).await?);

    // Ten workers contend for three connections.
    let mut handles = Vec::new();
    for worker in 0..10 {
        let pool = Arc::clone(&pool);
        let priority = if worker == 9 {
            Priority::Critical
        } else {
            Priority::Normal
        };
        handles.push(tokio::spawn(async move {
            let conn = pool.acquire_with(None, priority).await.unwrap();
            println!("worker {worker} got connection {}", *conn);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }));
    }
    for handle in handles {
        handle.await.expect("worker panicked");
    }

    // A deadline that cannot be met is an ordinary error.
    let held: Vec<_> = futures::future::join_all((0..3).map(|_| pool.acquire()))
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;
    match pool
        .acquire_with_deadline(None, Priority::Low, Duration::from_millis(100))
        .await
    {
        Err(PoolError::Timeout { timeout_ms }) => {
            println!("\nsaturated pool timed out after {timeout_ms}ms (retryable)");
        }
        other => println!("unexpected: {:?}", other.map(|g| g.id())),
    }
    drop(held);

    let stats = pool.stats();
    println!(
        "\nStats: created={} reused={} utilization={:.2}",
        stats.created_total, stats.reused_total, stats.utilization
    );

    pool.shutdown().await?;
    Ok(())
}
