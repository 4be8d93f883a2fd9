//! Shell - スクリプト文字列を `sh -c` で実行する Command 実装

use crate::context::ExecContext;
use crate::ports::Command;

use super::process::{ProcessExecution, Program};

/// Runs each task's argument as a shell script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: Program,
}

impl Shell {
    /// `sh -c <script>`.
    pub fn new() -> Self {
        Self::with_program(Program::new("sh"))
    }

    /// Use a different shell; it must accept `-c <script>`.
    pub fn with_program(program: Program) -> Self {
        Self { program }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Shell {
    type Args = String;
    type Exec = ProcessExecution;

    fn resolve(&self, ctx: &ExecContext, script: String) -> ProcessExecution {
        self.program.resolve(ctx, vec!["-c".to_string(), script])
    }
}
