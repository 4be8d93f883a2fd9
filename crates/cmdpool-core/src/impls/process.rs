//! Program - 外部プログラムを起動する Command 実装
//!
//! Runs one external program per task with `tokio::process`. Stdout and stderr
//! are captured into one buffer in arrival order. When the context finishes
//! first, the child is killed and whatever it printed so far is kept.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ExecContext;
use crate::domain::ExecError;
use crate::ports::{Command, Executable};

/// How long to keep reading pipes after the child has been killed.
///
/// A grandchild that inherited the pipes can keep them open long after the
/// child is gone. After a normal exit the pipes are read to EOF; only a killed
/// run gives up on them after this.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// An external program. Arguments are supplied per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    program: String,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Program {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl From<&str> for Program {
    fn from(program: &str) -> Self {
        Self::new(program)
    }
}

impl Command for Program {
    type Args = Vec<String>;
    type Exec = ProcessExecution;

    fn resolve(&self, ctx: &ExecContext, args: Vec<String>) -> ProcessExecution {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        ProcessExecution {
            command,
            ctx: ctx.clone(),
        }
    }
}

/// A resolved process, bound to the context it was resolved with.
#[derive(Debug)]
pub struct ProcessExecution {
    command: tokio::process::Command,
    ctx: ExecContext,
}

enum Exit {
    Exited(std::io::Result<std::process::ExitStatus>),
    Stopped(crate::context::ContextError),
}

#[async_trait]
impl Executable for ProcessExecution {
    async fn run(mut self) -> (Vec<u8>, Result<(), ExecError>) {
        // 期限切れ・キャンセル済みなら起動しない
        if let Some(cause) = self.ctx.err() {
            return (Vec::new(), Err(ExecError::Interrupted(cause)));
        }

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => return (Vec::new(), Err(ExecError::Spawn(e))),
        };
        let pid = child.id();
        debug!(?pid, "spawned child process");

        let buffer: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        let mut pumps = [
            pump(child.stdout.take(), Arc::clone(&buffer)),
            pump(child.stderr.take(), Arc::clone(&buffer)),
        ];

        let exit = tokio::select! {
            status = child.wait() => Exit::Exited(status),
            cause = self.ctx.done() => Exit::Stopped(cause),
        };

        let mut status = match exit {
            Exit::Exited(Ok(status)) if status.success() => Ok(()),
            Exit::Exited(Ok(status)) => Err(ExecError::Exit(status)),
            Exit::Exited(Err(e)) => Err(ExecError::Io(e)),
            Exit::Stopped(cause) => {
                debug!(?pid, %cause, "killing child process");
                if let Err(e) = child.kill().await {
                    warn!(?pid, error = %e, "failed to kill child process");
                }
                Err(ExecError::Interrupted(cause))
            }
        };

        let drain = async {
            for pump in pumps.iter_mut() {
                let _ = pump.await;
            }
        };
        let drained = if matches!(status, Err(ExecError::Interrupted(_))) {
            tokio::time::timeout(DRAIN_GRACE, drain).await.is_ok()
        } else {
            // 正常終了なら EOF まで読む。止めるのはコンテキストだけ
            tokio::select! {
                _ = drain => true,
                cause = self.ctx.done() => {
                    if status.is_ok() {
                        status = Err(ExecError::Interrupted(cause));
                    }
                    false
                }
            }
        };
        if !drained {
            debug!(?pid, "output pipes still open after exit, giving up on them");
            for pump in &pumps {
                pump.abort();
            }
        }

        let output = std::mem::take(&mut *buffer.lock().await);
        (output, status)
    }
}

/// Copy one pipe into the shared buffer until EOF.
fn pump<R>(reader: Option<R>, buffer: SharedBuffer) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return Ok(());
        };
        let mut chunk = [0u8; 4096];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buffer.lock().await.extend_from_slice(&chunk[..n]);
        }
    })
}
