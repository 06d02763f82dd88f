//! Exclusive, FIFO-fair guard around engine state mutation.
//!
//! Recovery (dispose + recreate) takes the exclusive side; ordinary trial
//! execution holds the shared side for the duration of the completion call,
//! so a recovery triggered by one failure waits for an in-flight call to
//! finish or time out instead of pulling the engine out from under it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// tokio's `RwLock` queues readers and writers FIFO, which gives the
/// fairness guarantee directly; this wrapper only adds diagnostics.
#[derive(Debug, Default)]
pub struct EngineStateLock {
    inner: RwLock<()>,
    exclusive_waiting: AtomicUsize,
    exclusive_held: AtomicBool,
}

impl EngineStateLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` with exclusive ownership. Queued callers are released in
    /// arrival order, one at a time; at most one body executes at any
    /// instant. The operation's output (or failure value) passes through
    /// untouched.
    pub async fn with_lock<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.exclusive_waiting.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.write().await;
        self.exclusive_waiting.fetch_sub(1, Ordering::SeqCst);
        self.exclusive_held.store(true, Ordering::SeqCst);
        let out = op().await;
        self.exclusive_held.store(false, Ordering::SeqCst);
        drop(guard);
        out
    }

    /// Run `op` holding the shared side: excluded against `with_lock`
    /// bodies but not against other shared holders.
    pub async fn with_shared<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.inner.read().await;
        let out = op().await;
        drop(guard);
        out
    }

    /// True while an exclusive body is executing.
    pub fn is_locked(&self) -> bool {
        self.exclusive_held.load(Ordering::SeqCst)
    }

    /// Number of callers waiting for (or about to take) the exclusive side.
    pub fn queue_length(&self) -> usize {
        self.exclusive_waiting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::task::yield_now;

    #[tokio::test]
    async fn with_lock_returns_operation_output() {
        let lock = EngineStateLock::new();
        let out = lock.with_lock(|| async { 42 }).await;
        assert_eq!(out, 42);
        assert!(!lock.is_locked());
        assert_eq!(lock.queue_length(), 0);
    }

    #[tokio::test]
    async fn failures_propagate_through_the_lock() {
        let lock = EngineStateLock::new();
        let out: anyhow::Result<()> = lock
            .with_lock(|| async { anyhow::bail!("scripted failure") })
            .await;
        assert!(out.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn queued_bodies_run_in_submission_order() {
        let lock = Arc::new(EngineStateLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.with_lock(|| async move {
                    release_rx.await.ok();
                })
                .await;
            })
        };
        // Let the holder take the lock before queueing waiters.
        yield_now().await;
        assert!(lock.is_locked());

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                lock.with_lock(|| async move {
                    order.lock().unwrap().push(i);
                })
                .await;
            }));
            // Each waiter must be parked in the queue before the next spawns.
            yield_now().await;
            yield_now().await;
        }
        assert_eq!(lock.queue_length(), 5);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(lock.queue_length(), 0);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn shared_holders_block_exclusive_but_not_each_other() {
        let lock = Arc::new(EngineStateLock::new());
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.with_shared(|| async move {
                    hold_rx.await.ok();
                })
                .await;
            })
        };
        yield_now().await;

        // A second shared holder gets in immediately.
        lock.with_shared(|| async {}).await;

        // The exclusive side has to wait for the reader.
        let writer = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.with_lock(|| async {}).await;
            })
        };
        yield_now().await;
        assert_eq!(lock.queue_length(), 1);
        assert!(!lock.is_locked());

        hold_tx.send(()).unwrap();
        reader.await.unwrap();
        writer.await.unwrap();
        assert_eq!(lock.queue_length(), 0);
    }
}
