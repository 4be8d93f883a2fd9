//! Errors - 実行エラーとプールのエラー
//!
//! `ExecError` is what a single executable reports. `PoolError` is what callers
//! of the pool see; execution failures are wrapped together with whatever output
//! the command produced before it failed.

use std::process::ExitStatus;

use thiserror::Error;

use crate::context::ContextError;

/// Failure of one executable run.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("i/o error while running command: {0}")]
    Io(#[source] std::io::Error),

    /// Process ran but did not exit cleanly ("exit status: 1", "signal: 9 (SIGKILL)").
    #[error("{0}")]
    Exit(ExitStatus),

    /// Process was stopped because the shared context finished.
    #[error("killed: {0}")]
    Interrupted(ContextError),

    #[error("{0}")]
    Failed(String),
}

/// Error returned by `CommandPool` operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("{source}: {output}")]
    Execution { source: ExecError, output: String },

    #[error("command pool is closed")]
    Closed,

    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    /// A worker dropped the reply channel without sending a result.
    #[error("worker dropped the task without reporting a result")]
    WorkerGone,

    /// `Command::resolve` or `Executable::run` panicked. The worker keeps running.
    #[error("command panicked: {0}")]
    Panicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Context error behind an interrupted execution, if that is what this is.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            PoolError::Execution {
                source: ExecError::Interrupted(cause),
                ..
            } => Some(*cause),
            _ => None,
        }
    }

    pub fn is_deadline(&self) -> bool {
        self.context_error() == Some(ContextError::DeadlineExceeded)
    }

    pub fn is_canceled(&self) -> bool {
        self.context_error() == Some(ContextError::Canceled)
    }

    /// Output captured before an execution failure.
    pub fn output(&self) -> Option<&str> {
        match self {
            PoolError::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}
