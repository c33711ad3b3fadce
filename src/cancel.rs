//! Cancellation token shared between an agent task and its collaborators.
//!
//! A token is a shared flag plus a broadcast: setting it flips the flag
//! for every poller and wakes every waiter. Cancellation is idempotent
//! and irreversible for the lifetime of the token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative cancellation signal.
///
/// Cloning is cheap; all clones observe the same state. The executor
/// checks the token at every suspension point, and running tools receive
/// a clone through their execution context.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    ///
    /// Returns immediately if cancellation already happened. Intended for
    /// `tokio::select!` against long-running work.
    pub async fn cancelled(&self) {
        // Register interest before the flag check so a concurrent cancel
        // between check and await cannot be missed.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
