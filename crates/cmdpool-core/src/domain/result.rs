//! Result of one executed task.

use super::errors::{ExecError, PoolError};

/// Captured output on success, or the failure with the output folded into it.
pub type CommandResult = Result<Vec<u8>, PoolError>;

/// Turn a raw `(output, status)` pair from an executable into a `CommandResult`.
pub fn into_result(output: Vec<u8>, status: Result<(), ExecError>) -> CommandResult {
    match status {
        Ok(()) => Ok(output),
        Err(source) => Err(PoolError::Execution {
            source,
            output: String::from_utf8_lossy(&output).into_owned(),
        }),
    }
}
