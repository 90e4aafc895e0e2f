//! Bounded-parallelism gate for conversation tasks.
//!
//! Backed by a fair [`Semaphore`]: waiters are admitted in the order they
//! started waiting. [`ConcurrencyLimiter::spawn`] takes its permit before it
//! returns, so admission follows submission order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
}

impl ConcurrencyLimiter {
    /// A ceiling below 1 is clamped to 1.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.semaphore.available_permits()
    }

    /// Run `task` once a slot is free and return its output.
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed.
        let _permit = self.semaphore.acquire().await.ok();
        task.await
    }

    /// Wait for a slot, then run `task` on the runtime holding that slot.
    ///
    /// The slot is released when the task finishes, fails or panics; the
    /// outcome reaches only whoever awaits the returned handle.
    pub async fn spawn<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await.ok();
        tokio::spawn(async move {
            let _permit = permit;
            task.await
        })
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_never_exceeds_ceiling() {
        let limiter = ConcurrencyLimiter::new(3);
        let gauge = Arc::new(Gauge::default());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let gauge = gauge.clone();
            handles.push(
                limiter
                    .spawn(async move {
                        gauge.enter();
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        gauge.leave();
                    })
                    .await,
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_admits_in_submission_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..6 {
            let order = order.clone();
            handles.push(
                limiter
                    .spawn(async move {
                        order.lock().await.push(i);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    })
                    .await,
            );
        }
        futures::future::join_all(handles).await;

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failure_and_panic_release_the_slot() {
        let limiter = ConcurrencyLimiter::new(1);

        let failed: Result<(), String> = limiter
            .schedule(async { Err("boom".to_string()) })
            .await;
        assert!(failed.is_err());

        let panicked = limiter
            .spawn(async {
                panic!("conversation blew up");
            })
            .await;
        assert!(panicked.await.is_err());

        let after = limiter.spawn(async { 42 }).await;
        assert_eq!(after.await.unwrap(), 42);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).ceiling(), 1);
        assert_eq!(ConcurrencyLimiter::default().ceiling(), DEFAULT_MAX_CONCURRENCY);
    }
}
