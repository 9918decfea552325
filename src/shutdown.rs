//! Cooperative shutdown signal shared by threads and async tasks.
//!
//! The reading source runs on a plain OS thread and waits with
//! [`ShutdownSignal::wait_timeout`]; the periodic loops run on tokio and await
//! [`ShutdownSignal::cancelled`]. Triggering wakes both kinds of waiter.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    triggered: Mutex<bool>,
    condvar: Condvar,
    notify: Notify,
}

/// Clonable handle; all clones observe the same trigger.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        let mut triggered = self.inner.triggered.lock();
        if *triggered {
            return;
        }
        *triggered = true;
        self.inner.condvar.notify_all();
        self.inner.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Block the current thread for up to `timeout`.
    ///
    /// Returns `true` if shutdown was requested (before or during the wait).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut triggered = self.inner.triggered.lock();
        if !*triggered {
            // Spurious wakeups only shorten the sleep; callers re-check per cycle.
            let _ = self.inner.condvar.wait_for(&mut triggered, timeout);
        }
        *triggered
    }

    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent trigger is not missed.
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Async sleep that ends early on shutdown. Returns `true` if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }
}
