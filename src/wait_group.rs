//! Count-down completion barrier.
//!
//! Every registered task holds a [`Ticket`]; dropping the ticket counts the
//! group down, so a task is counted exactly once whether it returned, failed,
//! panicked or was cancelled.

use std::{
    pin::pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    sync::Notify,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;


#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: AtomicUsize,
    notify: Notify,
}

/// Outstanding registration in a [`WaitGroup`].
pub struct Ticket {
    inner: Arc<Inner>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> Ticket {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        Ticket { inner: self.inner.clone() }
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register before checking so a count-down between the load and
            // the await is not lost.
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns `false` if the deadline passed with tickets still outstanding.
    pub async fn wait_timeout(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        tokio::time::timeout_at(deadline, self.wait()).await.is_ok()
    }

    /// Waits for the group or for `cancel`, whichever comes first. Returns
    /// `false` when cancelled; the token is left as the caller set it.
    pub async fn wait_until(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = self.wait() => true,
            _ = cancel.cancelled() => false,
        }
    }
}
