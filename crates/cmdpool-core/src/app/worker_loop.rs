//! WorkerLoop - 固定数のワーカーでタスクを実行する
//!
//! # フロー
//! 1. 共有の job channel から `Job` を 1 件受け取る
//! 2. `Command::resolve()` で共有コンテキストに結び付いた実行体を作る
//! 3. 実行して出力と終了状態を回収 → `CommandResult`
//! 4. oneshot で投入元に返す

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::context::ExecContext;
use crate::domain::{CommandResult, PoolError, TaskEnvelope, into_result};
use crate::ports::{Command, Executable};

/// One unit of work plus the channel its result goes back on.
pub struct Job<C: Command> {
    pub envelope: TaskEnvelope<C, C::Args>,
    pub reply: oneshot::Sender<CommandResult>,
}

type SharedJobs<C> = Arc<Mutex<mpsc::Receiver<Job<C>>>>;

/// Worker group handle.
/// - `submit()` はワーカーが全員埋まっていてバッファも満杯なら待つ
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup<C: Command> {
    jobs_tx: mpsc::Sender<Job<C>>,
    jobs_rx: SharedJobs<C>,
    shutdown_tx: watch::Sender<bool>,
    joins: StdMutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl<C: Command> WorkerGroup<C> {
    /// Spawn `n` workers that execute against `ctx`.
    pub fn spawn(n: usize, ctx: ExecContext) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(n.max(1));
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let jobs = Arc::clone(&jobs_rx);
            let ctx = ctx.clone();
            let rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, jobs, ctx, rx).await;
            });
            joins.push(join);
        }

        Self {
            jobs_tx,
            jobs_rx,
            shutdown_tx,
            joins: StdMutex::new(joins),
            size: n,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Hand a job to the workers.
    pub async fn submit(&self, job: Job<C>) -> Result<(), PoolError> {
        self.jobs_tx.send(job).await.map_err(|_| PoolError::Closed)
    }

    /// Request shutdown for all workers.
    /// In-flight executions are not interrupted here; cancel the context for that.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown, wait for all workers, then fail anything left in the channel.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();

        let joins = match self.joins.lock() {
            Ok(mut joins) => std::mem::take(&mut *joins),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for j in joins {
            let _ = j.await;
        }

        let mut rx = self.jobs_rx.lock().await;
        rx.close();
        while let Ok(job) = rx.try_recv() {
            let _ = job.reply.send(Err(PoolError::Closed));
        }
    }
}

async fn worker_loop<C: Command>(
    worker_id: usize,
    jobs: SharedJobs<C>,
    ctx: ExecContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // recv は「待つ」ので select で shutdown と競合させる
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // WorkerGroup が drop された
                    break;
                }
                continue;
            }
            job = async { jobs.lock().await.recv().await } => job,
        };

        let Some(job) = job else {
            // 送信側がすべて閉じた
            break;
        };

        dispatch(worker_id, &ctx, job).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn dispatch<C: Command>(worker_id: usize, ctx: &ExecContext, job: Job<C>) {
    let Job { envelope, reply } = job;
    let (task_id, command, args) = envelope.into_parts();
    let started = Instant::now();
    debug!(worker_id, %task_id, ?command, "executing command");

    // 別タスクで実行し、panic してもワーカー自体は生き残る
    let run_ctx = ctx.clone();
    let execution = tokio::spawn(async move { command.resolve(&run_ctx, args).run().await });
    let result = match execution.await {
        Ok((output, status)) => into_result(output, status),
        Err(e) => {
            error!(worker_id, %task_id, error = %e, "command execution panicked");
            Err(join_failure(e))
        }
    };

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(output) => debug!(
            worker_id,
            %task_id,
            elapsed_ms,
            bytes = output.len(),
            "command succeeded"
        ),
        Err(err) => warn!(worker_id, %task_id, elapsed_ms, error = %err, "command failed"),
    }

    if reply.send(result).is_err() {
        warn!(worker_id, %task_id, "submitter went away before the result was delivered");
    }
}

fn join_failure(e: JoinError) -> PoolError {
    if !e.is_panic() {
        return PoolError::WorkerGone;
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    PoolError::Panicked(message)
}
