//! Volatile in-flight work counter
//!
//! Tracks how many units of work are outstanding and lets tasks await the
//! count reaching zero. Increments hand back a scoped guard so the count is
//! released on every exit path, including cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A non-negative counter safe under concurrent increment and decrement.
#[derive(Debug, Default)]
pub struct VolatileCounter {
    count: AtomicUsize,
    zero: Notify,
}

impl VolatileCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current value. Only a sample; the count may change immediately after.
    pub fn value(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_zero(&self) -> bool {
        self.value() == 0
    }

    /// Increment the counter, returning a guard that decrements on drop.
    pub fn increment(self: &Arc<Self>) -> CounterGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        CounterGuard {
            counter: Arc::clone(self),
        }
    }

    /// Complete when the count is observed at zero. Completes immediately if
    /// the counter is already zero.
    pub async fn wait_for_zero(&self) {
        loop {
            // Register interest before sampling so a decrement between the
            // sample and the await cannot be missed.
            let notified = self.zero.notified();
            if self.is_zero() {
                return;
            }
            notified.await;
        }
    }

    fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }
}

/// Scoped release handle for one increment of a [`VolatileCounter`].
#[derive(Debug)]
pub struct CounterGuard {
    counter: Arc<VolatileCounter>,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_completes_immediately_when_zero() {
        let counter = VolatileCounter::new();
        tokio::time::timeout(Duration::from_millis(50), counter.wait_for_zero())
            .await
            .expect("wait on a zero counter must not block");
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let counter = VolatileCounter::new();
        let guard = counter.increment();
        assert_eq!(counter.value(), 1);
        drop(guard);
        assert!(counter.is_zero());
    }

    #[tokio::test]
    async fn test_wait_observes_last_decrement() {
        let counter = VolatileCounter::new();
        let g1 = counter.increment();
        let g2 = counter.increment();

        let waiter = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.wait_for_zero().await })
        };

        tokio::task::yield_now().await;
        drop(g1);
        drop(g2);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake after the final release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_guard_releases_on_cancellation() {
        let counter = VolatileCounter::new();
        let task = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let _guard = counter.increment();
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };

        // Give the task a chance to take its increment, then cancel it.
        while counter.is_zero() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(counter.is_zero());
    }
}
