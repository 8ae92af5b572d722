//! # muxpool
//!
//! Multiplexed async resource pool for expensive, stateful resources
//! (browser sessions, WASM instances, client connections) that must be
//! reused safely under concurrent contention.
//!
//! ## Features
//!
//! - Generic `Pool<T>` port trait with ownership-transferring acquire
//! - Automatic release via RAII (Drop), safe under cancellation and panic
//! - Fair priority wait queue with per-waiter deadlines and fail-fast
//!   backpressure
//! - Session affinity: related requests prefer their previous resource
//! - Adaptive command batching with self-tuning size and flush timeout
//! - Tiered background health checks (cheap liveness + full diagnostic)
//!   with in-place recovery and eviction
//! - Soft/hard memory limits with proactive idle eviction
//! - Creation breaker to fail fast when the driver is down
//! - Lifecycle event stream and O(1) health/stats snapshots
//!
//! ## Quick Start
//!
//! ```no_run
//! use muxpool::{ConnectionPool, PoolConfig, Pool, ResourceDriver};
//! use std::convert::Infallible;
//!
//! struct EchoDriver;
//!
//! #[async_trait::async_trait]
//! impl ResourceDriver for EchoDriver {
//!     type Resource = String;
//!     type Error = Infallible;
//!
//!     async fn create(&self) -> Result<String, Infallible> {
//!         Ok("session".to_string())
//!     }
//!     async fn validate(&self, _resource: &String) -> bool {
//!         true
//!     }
//!     async fn close(&self, _resource: String) {}
//! }
//!
//! # async fn demo() -> muxpool::PoolResult<()> {
//! let pool = ConnectionPool::new(EchoDriver, PoolConfig::default()).await?;
//! {
//!     let session = pool.acquire().await?;
//!     println!("got: {}", *session);
//!     // Returned to the pool when `session` goes out of scope.
//! }
//! # Ok(())
//! # }
//! ```

mod affinity;
mod batch;
mod circuit_breaker;
mod config;
mod driver;
mod entry;
mod errors;
mod health;
mod monitor;
mod pool;
mod wait_queue;

pub use batch::{AdaptiveBatchState, BatchCommand, BatchResult, BatchSummary};
pub use circuit_breaker::BreakerState;
pub use config::PoolConfig;
pub use driver::{CommandDriver, Diagnosis, PoolEvent, ResourceDriver};
pub use errors::{PoolError, PoolResult};
pub use health::{PoolHealth, PoolStats};
pub use pool::{ConnectionPool, Pool, PooledResource};
pub use wait_queue::Priority;
