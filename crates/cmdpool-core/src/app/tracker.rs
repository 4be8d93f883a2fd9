//! Outstanding - 非同期タスクの未完了数
//!
//! A counter backed by a `watch` channel so waiters are woken on every change
//! and can wait for it to reach zero.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
pub struct Outstanding {
    tx: watch::Sender<usize>,
}

impl Outstanding {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Count one more task. The count drops again when the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> OutstandingGuard {
        self.tx.send_modify(|n| *n += 1);
        OutstandingGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn current(&self) -> usize {
        *self.tx.borrow()
    }

    /// Resolves once the count is zero.
    pub async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // sender は self が持っているので閉じることはない
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for Outstanding {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the count on drop, including when a handler panics.
#[derive(Debug)]
pub struct OutstandingGuard {
    tracker: Arc<Outstanding>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.tracker.tx.send_modify(|n| *n -= 1);
    }
}
