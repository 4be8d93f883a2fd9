//! Command port - プールが消費する「実行可能なコマンド」の抽象
//!
//! The pool never builds processes itself. It asks a `Command` to resolve an
//! argument payload against the shared context, then runs whatever comes back.

use std::fmt;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::domain::ExecError;

/// Something that runs to completion and reports combined output plus status.
///
/// Implementations must honor the context they were resolved with: once it is
/// done, `run` should stop the underlying work and return
/// `ExecError::Interrupted`.
#[async_trait]
pub trait Executable: Send + 'static {
    async fn run(self) -> (Vec<u8>, Result<(), ExecError>);
}

/// A command descriptor.
///
/// # 使用例
/// ```ignore
/// let pool = CommandPool::new(&ExecContext::background(), None, 4)?;
/// let out = pool.process(Program::new("echo"), vec!["hi".into()]).await?;
/// ```
pub trait Command: fmt::Debug + Send + 'static {
    /// Payload needed to turn this descriptor into something runnable.
    type Args: Send + 'static;

    type Exec: Executable;

    fn resolve(&self, ctx: &ExecContext, args: Self::Args) -> Self::Exec;
}
