//! Basic usage: acquire, automatic release, snapshots

use async_trait::async_trait;
use muxpool::{ConnectionPool, Pool, PoolConfig, ResourceDriver};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Session {
    id: u64,
}

struct SessionDriver {
    serial: AtomicU64,
}

#[async_trait]
impl ResourceDriver for SessionDriver {
    type Resource = Session;
    type Error = Infallible;

    async fn create(&self) -> Result<Session, Infallible> {
        Ok(Session {
            id: self.serial.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn validate(&self, _session: &Session) -> bool {
        true
    }

    async fn close(&self, session: Session) {
        println!("  closing session {}", session.id);
    }
}

#[tokio::main]
async fn main() -> muxpool::PoolResult<()> {
    println!("=== muxpool - Basic Usage ===\n");

    let driver = SessionDriver {
        serial: AtomicU64::new(0),
    };
    let config = PoolConfig::new().with_max_size(4).with_initial_size(2);
    let pool = ConnectionPool::new(driver, config).await?;

    println!("Pre-warmed: {} available", pool.available());

    {
        let session = pool.acquire().await?;
        println!("Acquired session {:?}", *session);
        println!("In use: {}, available: {}", pool.in_use(), pool.available());
        // Returned automatically when `session` goes out of scope.
    }

    // The drop travels through the reclaim task.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    println!("After return: {} available", pool.available());

    let health = pool.health();
    println!(
        "\nHealth: total={} success_rate={:.2} avg_acquire={:.2}ms",
        health.total, health.success_rate, health.avg_acquisition_time_ms
    );

    pool.shutdown().await?;
    println!("Pool drained");
    Ok(())
}
