use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A lightweight, cloneable cancellation flag.
///
/// Cancellation is level-triggered and permanent: once [`CancelToken::cancel`]
/// has been called every clone observes it, and every pending or future
/// [`CancelToken::cancelled`] call resolves immediately.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel cannot slip
            // between the check and the await.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// A token that is cancelled when `self` is, but can also be cancelled
    /// on its own without affecting the parent.
    pub fn child(&self) -> CancelToken {
        CancelToken::join(self, &CancelToken::new())
    }

    /// A token tied to two lifetimes: it is cancelled as soon as either
    /// input token is.
    pub fn join(a: &CancelToken, b: &CancelToken) -> CancelToken {
        let joined = CancelToken::new();
        let (a, b, out) = (a.clone(), b.clone(), joined.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = a.cancelled() => out.cancel(),
                _ = b.cancelled() => out.cancel(),
                // The joined token was cancelled directly; nothing to relay.
                _ = out.cancelled() => {}
            }
        });
        joined
    }
}
