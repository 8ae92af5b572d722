//! Fair wait queue for acquire requests that cannot be satisfied immediately

use crate::errors::PoolResult;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;

/// Priority of an acquire request.
///
/// Orders the wait queue only: the highest-priority, oldest waiter is served
/// first when a resource frees up. Priority never preempts an in-flight
/// checkout.
///
/// # Examples
///
/// ```
/// use muxpool::Priority;
///
/// assert!(Priority::Critical > Priority::High);
/// assert!(Priority::Normal > Priority::Low);
/// assert_eq!(Priority::default(), Priority::Normal);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// A pending acquire request.
pub(crate) struct Waiter<G> {
    pub id: u64,
    pub context: Option<String>,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    pub tx: oneshot::Sender<PoolResult<G>>,
}

impl<G> std::fmt::Debug for Waiter<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Queue of waiters ordered by `(priority desc, enqueued_at asc)`.
///
/// Expired waiters are purged on every interaction; their receiver side
/// observes the closed channel and reports the timeout itself, so no stale
/// grant can ever be delivered.
pub(crate) struct WaitQueue<G> {
    waiters: VecDeque<Waiter<G>>,
    max_depth: usize,
}

impl<G> WaitQueue<G> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            waiters: VecDeque::new(),
            max_depth,
        }
    }

    /// Insert a waiter in priority order, FIFO within equal priority.
    /// Returns the waiter back when the queue is at max depth.
    pub fn enqueue(&mut self, waiter: Waiter<G>) -> Result<(), Waiter<G>> {
        self.purge_expired();
        if self.waiters.len() >= self.max_depth {
            return Err(waiter);
        }
        let pos = self
            .waiters
            .iter()
            .position(|w| w.priority < waiter.priority)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(pos, waiter);
        Ok(())
    }

    /// Pop the highest-priority, oldest live waiter.
    pub fn pop(&mut self) -> Option<Waiter<G>> {
        self.purge_expired();
        self.waiters.pop_front()
    }

    /// Remove a waiter by id. Used when the waiting future times out or is
    /// dropped, so the entry cannot receive a grant afterwards.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        before != self.waiters.len()
    }

    pub fn depth(&self) -> usize {
        self.waiters.len()
    }

    /// Take every waiter out, e.g. to fail them during shutdown.
    pub fn drain(&mut self) -> Vec<Waiter<G>> {
        self.waiters.drain(..).collect()
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.waiters.retain(|w| w.deadline > now);
    }
}
