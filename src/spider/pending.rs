//! Work-in-flight counter for crawl quiescence detection
//!
//! The counter is incremented in the caller's context before a unit of work
//! enters a channel, and decremented only by the event loop once the
//! corresponding result has been fully processed. `wait` therefore cannot
//! return while any message is still queued or being handled.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct PendingCounter {
    count: AtomicUsize,
    zero: Notify,
}

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `n` new units of work. Call before enqueuing them.
    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Retire one unit of work. Only the event loop calls this, and only
    /// after the unit's result has been processed in full.
    pub fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pending counter underflow");
        if prev == 1 {
            self.zero.notify_waiters();
        }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Block until the counter reaches zero.
    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.zero.notified());
            // Register before the check so a concurrent `done` cannot slip
            // between the load and the await.
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_at_zero() {
        let counter = PendingCounter::new();
        tokio::time::timeout(Duration::from_millis(100), counter.wait())
            .await
            .expect("wait should not block at zero");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_done() {
        let counter = Arc::new(PendingCounter::new());
        counter.add(2);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait().await })
        };

        counter.done();
        assert!(!waiter.is_finished());

        counter.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn test_add_during_drain_keeps_waiter_blocked() {
        let counter = Arc::new(PendingCounter::new());
        counter.add(1);

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait().await })
        };

        // New work arrives before the last unit retires.
        counter.add(1);
        counter.done();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        counter.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
