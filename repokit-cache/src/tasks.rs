//! Background cache work.
//!
//! Cache population after a miss and batched invalidation after
//! `delete_batch` run off the caller's path. [`CacheTasks`] spawns them on
//! the ambient Tokio runtime and counts what is still in flight so callers
//! (tests, graceful shutdown) can wait for the cache to settle.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct TasksInner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Tracker for fire-and-forget cache tasks. Clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct CacheTasks {
    inner: Arc<TasksInner>,
}

/// Decrements the pending count when the task ends, panics included.
struct PendingGuard(Arc<TasksInner>);

impl PendingGuard {
    fn new(inner: Arc<TasksInner>) -> Self {
        inner.pending.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl CacheTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` in the background. Outside a Tokio runtime the work is
    /// dropped with a warning.
    pub fn spawn<F>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::new(Arc::clone(&self.inner));
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _guard = guard;
                    fut.await;
                });
            }
            Err(_) => {
                warn!(task, "no tokio runtime, background cache task dropped");
                drop(guard);
            }
        }
    }

    /// Tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until no task is in flight.
    pub async fn quiesce(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}
