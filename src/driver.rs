//! Driver contract for externally managed resources
//!
//! The pool treats resources as opaque capabilities. Everything
//! resource-specific - spawning a browser session, instantiating a WASM
//! module, dialing a connection - lives behind [`ResourceDriver`]. The pool
//! only calls `create`, `validate`, and `close`; the remaining hooks have
//! defaults so simple drivers stay simple.

use crate::batch::BatchCommand;
use async_trait::async_trait;

/// Outcome of a full diagnostic probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// Resource passed the full probe.
    Healthy,
    /// Resource is impaired but the driver may be able to recover it
    /// in place.
    Degraded,
    /// Resource is unusable and must be destroyed.
    Failed,
}

/// Contract between the pool and the resource it manages.
#[async_trait]
pub trait ResourceDriver: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a fresh resource. Called outside the pool lock.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Cheap liveness probe. Must be fast; the full diagnostic lives in
    /// [`ResourceDriver::diagnose`].
    async fn validate(&self, resource: &Self::Resource) -> bool;

    /// Destroy a resource. Errors are the driver's to swallow or log.
    async fn close(&self, resource: Self::Resource);

    /// Full diagnostic probe. Defaults to the liveness probe.
    async fn diagnose(&self, resource: &mut Self::Resource) -> Diagnosis {
        if self.validate(resource).await {
            Diagnosis::Healthy
        } else {
            Diagnosis::Failed
        }
    }

    /// Attempt in-place recovery of a degraded resource, reusing the pool
    /// slot. Returns true when the resource is usable again.
    async fn recover(&self, _resource: &mut Self::Resource) -> bool {
        false
    }

    /// Current memory footprint of the resource in bytes. Feeds the pool's
    /// soft/hard memory limits; drivers that cannot measure return 0.
    fn memory_usage(&self, _resource: &Self::Resource) -> u64 {
        0
    }
}

/// Extension for drivers whose resources accept batched commands.
#[async_trait]
pub trait CommandDriver: ResourceDriver {
    /// Execute a single command against the resource.
    async fn execute(
        &self,
        resource: &Self::Resource,
        command: &BatchCommand,
    ) -> Result<serde_json::Value, Self::Error>;
}

/// Lifecycle events emitted by the pool.
///
/// Consumed through [`ConnectionPool::events`](crate::ConnectionPool::events)
/// by whatever sink the application wires up; the wire format is the sink's
/// concern.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A resource was handed to a caller.
    Acquired { id: u64, created: bool },
    /// A resource was returned to the idle set.
    Released { id: u64 },
    /// A resource was destroyed.
    Evicted { id: u64, reason: String },
    /// A degraded resource was recovered in place.
    Recovered { id: u64 },
    /// The creation breaker tripped after consecutive driver failures.
    CreationBreakerOpened { consecutive_failures: usize },
    /// Pool-wide degradation, e.g. tracked memory over the hard limit.
    Degraded { reason: String },
    /// The pool finished draining.
    ShutdownComplete,
}
