//! Scripted - プロセスを起動しないテスト用 Command
//!
//! Each task carries a `Step` describing how long it "runs" and how it ends.
//! The step honors the context the same way a real process would, which makes
//! pool behaviour testable with a paused tokio clock.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::domain::ExecError;
use crate::ports::{Command, Executable};

/// In-process command driven by `Step`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scripted;

/// What a scripted task does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub duration: Duration,
    pub output: String,
    pub failure: Option<String>,
}

impl Step {
    pub fn succeed(duration: Duration, output: impl Into<String>) -> Self {
        Self {
            duration,
            output: output.into(),
            failure: None,
        }
    }

    pub fn fail(duration: Duration, output: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            duration,
            output: output.into(),
            failure: Some(reason.into()),
        }
    }
}

impl Command for Scripted {
    type Args = Step;
    type Exec = ScriptedRun;

    fn resolve(&self, ctx: &ExecContext, step: Step) -> ScriptedRun {
        ScriptedRun {
            ctx: ctx.clone(),
            step,
        }
    }
}

#[derive(Debug)]
pub struct ScriptedRun {
    ctx: ExecContext,
    step: Step,
}

#[async_trait]
impl Executable for ScriptedRun {
    async fn run(self) -> (Vec<u8>, Result<(), ExecError>) {
        if let Some(cause) = self.ctx.err() {
            return (Vec::new(), Err(ExecError::Interrupted(cause)));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.step.duration) => {}
            cause = self.ctx.done() => {
                return (Vec::new(), Err(ExecError::Interrupted(cause)));
            }
        }

        let output = self.step.output.into_bytes();
        match self.step.failure {
            Some(reason) => (output, Err(ExecError::Failed(reason))),
            None => (output, Ok(())),
        }
    }
}
