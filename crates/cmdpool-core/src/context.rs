//! ExecContext - キャンセルと期限をひとつにまとめた実行コンテキスト
//!
//! A context carries a single "done" signal. It fires when the context is
//! cancelled explicitly, when a parent context is cancelled, or when its
//! deadline passes, whichever happens first.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal bounded by an optional deadline.
///
/// Cloning shares the same signal. `child()` and `with_deadline()` derive a new
/// context that finishes when the parent does, but can also be finished on its
/// own without affecting the parent.
#[derive(Debug, Clone)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    // 最初に観測された終了理由を固定する
    cause: Arc<OnceLock<ContextError>>,
}

impl ExecContext {
    /// A root context that is never done unless cancelled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Derive a cancellable child that keeps the parent's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Derive a cancellable child bounded by `deadline`.
    ///
    /// A parent deadline that is earlier still wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Like `with_deadline(now + timeout)`. A timeout too large to represent
    /// gives a plain `child()`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Finish this context (and every context derived from it).
    pub fn cancel(&self) {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            let _ = self.cause.set(ContextError::DeadlineExceeded);
        }
        let _ = self.cause.set(ContextError::Canceled);
        self.token.cancel();
    }

    /// `None` while the context is live, otherwise the reason it finished.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Some(*self.cause.get_or_init(|| ContextError::DeadlineExceeded));
        }
        if self.token.is_cancelled() {
            return Some(*self.cause.get_or_init(|| ContextError::Canceled));
        }
        None
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is done and returns the reason.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
        self.err().unwrap_or(ContextError::Canceled)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::background()
    }
}
