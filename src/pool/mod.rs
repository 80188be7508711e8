//! Bounded Worker Pool
//!
//! Each module owns two [`BoundedPool`]s. A pool caps how many of the owner's
//! tasks run at once, while every task also holds a permit from a scan-wide
//! [`SharedPool`], so the total across all modules stays bounded too.

pub mod error;

pub use error::{PoolError, PoolResult};

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::trace;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Scan-wide task capacity shared by many bounded pools
#[derive(Debug, Clone)]
pub struct SharedPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SharedPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by any task
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Per-owner concurrency limit layered over a [`SharedPool`]
#[derive(Debug, Clone)]
pub struct BoundedPool {
    /// Owner label used in log output
    name: String,
    /// Scan-wide capacity
    shared: SharedPool,
    /// Owner's own slots; one permit per in-flight task
    slots: Arc<Semaphore>,
    max_tasks: usize,
    /// Tasks holding a slot, including those still waiting for the shared pool
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    /// Scan stop signal
    cancel: CancellationToken,
}

/// Releases the in-flight count when a task ends, even by panic
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl BoundedPool {
    /// Create a pool allowing at most `max_tasks` concurrent tasks
    pub fn new(
        name: impl Into<String>,
        max_tasks: usize,
        shared: SharedPool,
        cancel: CancellationToken,
    ) -> Self {
        let max_tasks = max_tasks.max(1);
        Self {
            name: name.into(),
            shared,
            slots: Arc::new(Semaphore::new(max_tasks)),
            max_tasks,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Number of tasks currently in flight
    pub fn num_tasks(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Schedule `future`, waiting for a free slot first.
    ///
    /// `on_finish` runs after `future` completes, even if it panicked, and
    /// before the slot is released. Errors inside `future` are not observed
    /// here; callers wrap their futures themselves.
    pub async fn submit<F>(
        &self,
        future: F,
        on_finish: Option<BoxFuture<'static, ()>>,
    ) -> PoolResult<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)?
            }
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            idle: Arc::clone(&self.idle),
        };
        let shared = Arc::clone(&self.shared.semaphore);
        let cancel = self.cancel.clone();
        let name = self.name.clone();

        Ok(tokio::spawn(async move {
            let _slot = slot;
            let _guard = guard;
            let _global = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!("{name}: scan stopped while waiting for shared pool");
                    return;
                }
                permit = shared.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                trace!("{name}: task panicked");
            }
            if let Some(on_finish) = on_finish {
                on_finish.await;
            }
        }))
    }

    /// Resolve once no task is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.num_tasks() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn pool(max_tasks: usize, shared: usize) -> BoundedPool {
        BoundedPool::new("test", max_tasks, SharedPool::new(shared), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_max_tasks() {
        let pool = pool(2, 10);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                None,
            )
            .await
            .unwrap();
            assert!(pool.num_tasks() <= 2);
        }

        pool.wait_idle().await;
        assert_eq!(pool.num_tasks(), 0);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_pool_caps_across_owners() {
        let shared = SharedPool::new(1);
        let cancel = CancellationToken::new();
        let first = BoundedPool::new("first", 5, shared.clone(), cancel.clone());
        let second = BoundedPool::new("second", 5, shared.clone(), cancel);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for pool in [&first, &second, &first, &second] {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                None,
            )
            .await
            .unwrap();
        }

        first.wait_idle().await;
        second.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(shared.available(), 1);
    }

    #[tokio::test]
    async fn test_on_finish_runs_before_slot_is_released() {
        let pool = pool(1, 10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        let finish_log = Arc::clone(&order);
        pool.submit(
            async move {
                log.lock().push("first");
            },
            Some(
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finish_log.lock().push("first finished");
                }
                .boxed(),
            ),
        )
        .await
        .unwrap();

        let log = Arc::clone(&order);
        pool.submit(async move { log.lock().push("second") }, None)
            .await
            .unwrap();
        pool.wait_idle().await;

        assert_eq!(*order.lock(), vec!["first", "first finished", "second"]);
    }

    #[tokio::test]
    async fn test_on_finish_runs_after_panicking_future() {
        let pool = pool(1, 1);
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);

        let handle = pool
            .submit(
                async {
                    panic!("handler blew up");
                },
                Some(
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed(),
                ),
            )
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(pool.num_tasks(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejected_once_cancelled() {
        let cancel = CancellationToken::new();
        let pool = BoundedPool::new("test", 1, SharedPool::new(1), cancel.clone());

        // occupy the only slot
        pool.submit(tokio::time::sleep(Duration::from_secs(60)), None)
            .await
            .unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}, None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap().unwrap_err(), PoolError::Cancelled);
        assert_eq!(pool.submit(async {}, None).await.unwrap_err(), PoolError::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let pool = pool(3, 3);
        tokio::time::timeout(Duration::from_millis(50), pool.wait_idle())
            .await
            .expect("idle pool should not block");
    }
}
