//! Request-scoped operation context.
//!
//! A [`Ctx`] is an immutable value passed by reference into every repository
//! call. It carries three things:
//!
//! - an optional transaction handle, discovered by every storage call issued
//!   with that context (see [`inject_tx`] / [`extract_tx`])
//! - an optional deadline
//! - an optional cancellation signal
//!
//! Deriving a new context never mutates the original, so a transaction
//! injected into a derived context is invisible to the caller's context.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{RepoError, RepoResult};

/// An open unit of work on a backing store.
///
/// Stores hand out implementations from `Store::begin` and recognise their
/// own handles again through [`Transaction::as_any`].
#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    /// Make all changes staged in this transaction durable.
    async fn commit(&self) -> RepoResult<()>;

    /// Discard all changes staged in this transaction.
    async fn rollback(&self) -> RepoResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an open transaction.
pub type TxHandle = Arc<dyn Transaction>;

/// Downcast a transaction handle to the store's concrete type.
pub fn downcast_tx<T: Transaction>(tx: &TxHandle) -> Option<&T> {
    tx.as_any().downcast_ref::<T>()
}

struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        })
    }

    /// A state cancelled whenever `parent` is.
    fn child_of(parent: &Arc<CancelState>) -> Arc<Self> {
        let child = Self::new();
        let mut children = lock_children(parent);
        if parent.is_cancelled() {
            child.cancelled.store(true, Ordering::SeqCst);
        } else {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        child
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *lock_children(self));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn lock_children(state: &CancelState) -> MutexGuard<'_, Vec<Weak<CancelState>>> {
    // No critical section leaves the list half-updated, so poisoning is ignored.
    state.children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cancels the context it was created with and everything derived from it.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Operation context.
#[derive(Clone, Default)]
pub struct Ctx {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
    cancel: Option<Arc<CancelState>>,
}

impl Ctx {
    /// An empty context: no transaction, no deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context carrying `tx`.
    pub fn with_tx(&self, tx: TxHandle) -> Self {
        Self {
            tx: Some(tx),
            ..self.clone()
        }
    }

    pub fn tx(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    /// Derive a context that expires after `timeout`.
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Derive a cancellable context.
    ///
    /// Cancelling the returned handle cancels the returned context and every
    /// context derived from it. The parent's own cancellation still reaches
    /// the returned context; the handle never reaches the parent.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let state = match &self.cancel {
            Some(parent) => CancelState::child_of(parent),
            None => CancelState::new(),
        };
        let ctx = Self {
            cancel: Some(Arc::clone(&state)),
            ..self.clone()
        };
        (ctx, CancelHandle { state })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|s| s.is_cancelled())
    }

    /// A context for work that outlives the caller: no transaction, no
    /// deadline, no cancellation.
    pub fn detached(&self) -> Self {
        Self::default()
    }

    /// Fail fast if this context is already cancelled or past its deadline.
    pub fn check(&self) -> RepoResult<()> {
        if self.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RepoError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless this context is cancelled or its
    /// deadline passes first. The future is dropped in that case.
    pub async fn run<T, F>(&self, fut: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(state) => state.wait().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(RepoError::Cancelled),
            _ = expired => Err(RepoError::DeadlineExceeded),
            out = fut => out,
        }
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("tx", &self.tx.is_some())
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Derive a context that carries `tx`.
pub fn inject_tx(ctx: &Ctx, tx: TxHandle) -> Ctx {
    ctx.with_tx(tx)
}

/// The transaction carried by `ctx`, if any.
pub fn extract_tx(ctx: &Ctx) -> Option<TxHandle> {
    ctx.tx().cloned()
}
