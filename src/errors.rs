//! Error types for the resource pool

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool exhausted - wait queue is full")]
    Exhausted,

    #[error("Acquire timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Resource creation failed: {0}")]
    CreationFailed(String),

    #[error("Resource validation failed: {0}")]
    ValidationFailed(String),

    #[error("Pool is unhealthy: {reason}")]
    Unhealthy { reason: String },

    #[error("Pool is shutting down")]
    ShuttingDown,
}

impl PoolError {
    /// Whether a caller may reasonably retry the operation.
    ///
    /// `ShuttingDown` is terminal; everything else is a transient condition
    /// that clears once capacity frees up, the driver recovers, or memory
    /// pressure drops.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxpool::PoolError;
    ///
    /// assert!(PoolError::Exhausted.is_retryable());
    /// assert!(!PoolError::ShuttingDown.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolError::ShuttingDown)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
