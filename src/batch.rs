//! Adaptive command batching
//!
//! Many small commands against one resource amortize to a single round trip.
//! The batch size and flush timeout adapt to observed behavior: error-free,
//! fast batches grow the window; errors or slow completion shrink it. Both
//! knobs stay clamped to the configured bounds no matter what the feedback
//! looks like.

use crate::config::PoolConfig;
use serde::Serialize;
use std::time::{Duration, Instant};

/// A command buffered for batched execution.
///
/// `category` groups commands semantically: commands sharing a category are
/// dependent and execute strictly in submission order; distinct categories
/// are independent and may execute concurrently.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub name: String,
    pub category: String,
    pub params: serde_json::Value,
    pub submitted_at: Instant,
}

impl BatchCommand {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            params,
            submitted_at: Instant::now(),
        }
    }
}

/// Outcome of one command inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Aggregated outcome of one batch execution.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub results: Vec<BatchResult>,
}

/// Pending commands for one context.
pub(crate) struct BatchBuffer {
    commands: Vec<BatchCommand>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: BatchCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Age of the oldest pending command.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.commands.first().map(|c| c.submitted_at.elapsed())
    }

    pub fn drain(&mut self) -> Vec<BatchCommand> {
        std::mem::take(&mut self.commands)
    }
}

/// Runtime batch sizing state, bounded by the configured `[min, max]`.
pub struct AdaptiveBatchState {
    current_batch_size: usize,
    current_timeout: Duration,
    min_size: usize,
    max_size: usize,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl AdaptiveBatchState {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            current_batch_size: config.batch_min_size.max(1),
            current_timeout: config.batch_max_timeout,
            min_size: config.batch_min_size.max(1),
            max_size: config.batch_max_size,
            min_timeout: config.batch_min_timeout,
            max_timeout: config.batch_max_timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.current_batch_size
    }

    pub fn flush_timeout(&self) -> Duration {
        self.current_timeout
    }

    /// Adjust size and timeout from the observed outcome of one batch.
    ///
    /// Error-free batches whose average per-command time stays under the
    /// current timeout grow the batch and tighten the window; anything else
    /// shrinks the batch and loosens the window. Always clamped.
    pub fn adapt(&mut self, summary: &BatchSummary) {
        if summary.total == 0 {
            return;
        }
        let avg_ms = summary.elapsed_ms / summary.total as u64;
        let fast = Duration::from_millis(avg_ms) <= self.current_timeout;

        if summary.failed == 0 && fast {
            self.current_batch_size = (self.current_batch_size + 2).min(self.max_size);
            self.current_timeout = self
                .current_timeout
                .mul_f64(0.8)
                .max(self.min_timeout);
        } else {
            self.current_batch_size = (self.current_batch_size / 2).max(self.min_size);
            self.current_timeout = self
                .current_timeout
                .mul_f64(1.5)
                .min(self.max_timeout);
        }
    }
}
