//! TaskEnvelope - 投入されたコマンドと引数の組
//!
//! The pairing is checked by the type system: a pool over command type `C`
//! only accepts `C::Args`, so a worker never sees a malformed envelope.

use super::ids::TaskId;

/// An immutable (command, argument) pair travelling from submitter to worker.
///
/// Moved into exactly one worker, which consumes it with `into_parts`.
#[derive(Debug)]
pub struct TaskEnvelope<C, A> {
    id: TaskId,
    command: C,
    args: A,
}

impl<C, A> TaskEnvelope<C, A> {
    pub fn new(command: C, args: A) -> Self {
        Self {
            id: TaskId::generate(),
            command,
            args,
        }
    }

    pub fn into_parts(self) -> (TaskId, C, A) {
        (self.id, self.command, self.args)
    }
}
