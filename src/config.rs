//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use muxpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_size(10)
///     .with_min_size(2)
///     .with_acquire_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_size, 10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of resources the pool maintains
    pub min_size: usize,

    /// Maximum number of resources that can exist at once
    pub max_size: usize,

    /// Number of resources pre-created at pool construction
    pub initial_size: usize,

    /// Idle time after which a resource is destroyed
    pub idle_timeout: Option<Duration>,

    /// Total lifetime after which a resource is destroyed
    pub max_lifetime: Option<Duration>,

    /// Default deadline for acquire calls
    pub acquire_timeout: Duration,

    /// Interval between cheap liveness probes
    pub liveness_interval: Duration,

    /// Interval between full diagnostic probes
    pub diagnostic_interval: Duration,

    /// Tracked memory above which idle resources are proactively evicted
    pub soft_memory_limit: u64,

    /// Tracked memory above which acquire fails until pressure drops
    pub hard_memory_limit: u64,

    /// Lower bound for the adaptive batch size
    pub batch_min_size: usize,

    /// Upper bound for the adaptive batch size
    pub batch_max_size: usize,

    /// Lower bound for the adaptive batch flush timeout
    pub batch_min_timeout: Duration,

    /// Upper bound for the adaptive batch flush timeout
    pub batch_max_timeout: Duration,

    /// Time-to-live for session affinity records
    pub affinity_ttl: Duration,

    /// Wait queue depth beyond which acquire fails fast
    pub wait_queue_max_depth: usize,

    /// Whether to run the driver validation hook on every release
    pub validate_on_release: bool,

    /// Consecutive creation failures that trip the creation breaker
    pub creation_failure_threshold: usize,

    /// How long the creation breaker stays open before a retry is allowed
    pub creation_breaker_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            initial_size: 0,
            idle_timeout: Some(Duration::from_secs(30)),
            max_lifetime: Some(Duration::from_secs(300)),
            acquire_timeout: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(10),
            diagnostic_interval: Duration::from_secs(60),
            soft_memory_limit: 400 * 1024 * 1024,
            hard_memory_limit: 500 * 1024 * 1024,
            batch_min_size: 2,
            batch_max_size: 20,
            batch_min_timeout: Duration::from_millis(10),
            batch_max_timeout: Duration::from_millis(200),
            affinity_ttl: Duration::from_secs(60),
            wait_queue_max_depth: 64,
            validate_on_release: false,
            creation_failure_threshold: 5,
            creation_breaker_cooldown: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use muxpool::PoolConfig;
    ///
    /// let config = PoolConfig::new().with_max_size(50);
    /// assert_eq!(config.max_size, 50);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the number of resources created up front
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the idle timeout for resources
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum resource lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the default acquire deadline
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the liveness and diagnostic probe intervals
    pub fn with_health_intervals(mut self, liveness: Duration, diagnostic: Duration) -> Self {
        self.liveness_interval = liveness;
        self.diagnostic_interval = diagnostic;
        self
    }

    /// Set the soft and hard memory limits in bytes
    pub fn with_memory_limits(mut self, soft: u64, hard: u64) -> Self {
        self.soft_memory_limit = soft;
        self.hard_memory_limit = hard;
        self
    }

    /// Set the adaptive batch size bounds
    pub fn with_batch_size_bounds(mut self, min: usize, max: usize) -> Self {
        self.batch_min_size = min;
        self.batch_max_size = max;
        self
    }

    /// Set the adaptive batch timeout bounds
    pub fn with_batch_timeout_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.batch_min_timeout = min;
        self.batch_max_timeout = max;
        self
    }

    /// Set the session affinity TTL
    pub fn with_affinity_ttl(mut self, ttl: Duration) -> Self {
        self.affinity_ttl = ttl;
        self
    }

    /// Set the wait queue depth limit
    pub fn with_wait_queue_max_depth(mut self, depth: usize) -> Self {
        self.wait_queue_max_depth = depth;
        self
    }

    /// Run the driver validation hook on every release
    pub fn with_validate_on_release(mut self) -> Self {
        self.validate_on_release = true;
        self
    }

    /// Configure the creation breaker
    ///
    /// # Examples
    ///
    /// ```
    /// use muxpool::PoolConfig;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfig::new()
    ///     .with_creation_breaker(3, Duration::from_secs(10));
    ///
    /// assert_eq!(config.creation_failure_threshold, 3);
    /// ```
    pub fn with_creation_breaker(mut self, threshold: usize, cooldown: Duration) -> Self {
        self.creation_failure_threshold = threshold;
        self.creation_breaker_cooldown = cooldown;
        self
    }

    /// Check the configuration for inconsistent settings
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::Unhealthy {
                reason: "max_size must be greater than zero".into(),
            });
        }
        if self.min_size > self.max_size {
            return Err(PoolError::Unhealthy {
                reason: format!(
                    "min_size ({}) exceeds max_size ({})",
                    self.min_size, self.max_size
                ),
            });
        }
        if self.initial_size > self.max_size {
            return Err(PoolError::Unhealthy {
                reason: format!(
                    "initial_size ({}) exceeds max_size ({})",
                    self.initial_size, self.max_size
                ),
            });
        }
        if self.batch_min_size == 0 || self.batch_min_size > self.batch_max_size {
            return Err(PoolError::Unhealthy {
                reason: format!(
                    "batch size bounds [{}, {}] are invalid",
                    self.batch_min_size, self.batch_max_size
                ),
            });
        }
        if self.batch_min_timeout > self.batch_max_timeout {
            return Err(PoolError::Unhealthy {
                reason: "batch_min_timeout exceeds batch_max_timeout".into(),
            });
        }
        if self.soft_memory_limit >= self.hard_memory_limit {
            return Err(PoolError::Unhealthy {
                reason: format!(
                    "soft_memory_limit ({}) must be below hard_memory_limit ({})",
                    self.soft_memory_limit, self.hard_memory_limit
                ),
            });
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Unhealthy {
                reason: "acquire_timeout must be non-zero".into(),
            });
        }
        Ok(())
    }
}
