//! CommandPool - 外部コマンドを並列実行するプール
//!
//! Public face of the crate. Holds the shared context, the worker group and
//! the outstanding-task counter.
//!
//! # 使用例
//! ```ignore
//! let pool = CommandPool::new(&ExecContext::background(), None, 4)?;
//!
//! // 同期的に待つ
//! let out = pool.process(Program::new("uname"), vec!["-a".into()]).await?;
//!
//! // 非同期に投げて、あとでまとめて待つ
//! pool.start(Program::new("sleep"), vec!["1".into()], |result| {
//!     if let Err(e) = result {
//!         eprintln!("{e}");
//!     }
//! });
//! pool.wait().await;
//! pool.close().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::tracker::Outstanding;
use super::worker_loop::{Job, WorkerGroup};
use crate::config::PoolConfig;
use crate::context::ExecContext;
use crate::domain::{CommandResult, PoolError, TaskEnvelope};
use crate::observability::{Counters, PoolStats};
use crate::ports::Command;

/// Bounded pool of workers executing commands of type `C`.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct CommandPool<C: Command> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Command> {
    ctx: ExecContext,
    workers: WorkerGroup<C>,
    outstanding: Arc<Outstanding>,
    counters: Counters,
    closed: AtomicBool,
}

impl<C: Command> Clone for CommandPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Command> CommandPool<C> {
    /// Create a pool of `workers` workers.
    ///
    /// The shared context is derived from `parent` exactly once: bounded by
    /// `deadline` when one is given, and always cancellable through `close()`.
    /// Must be called from within a tokio runtime.
    pub fn new(
        parent: &ExecContext,
        deadline: Option<Instant>,
        workers: usize,
    ) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::InvalidWorkerCount(workers));
        }

        let ctx = match deadline {
            Some(deadline) => parent.with_deadline(deadline),
            None => parent.child(),
        };
        info!(
            workers,
            has_deadline = ctx.deadline().is_some(),
            "starting command pool"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                workers: WorkerGroup::spawn(workers, ctx.clone()),
                ctx,
                outstanding: Arc::new(Outstanding::new()),
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn from_config(parent: &ExecContext, config: &PoolConfig) -> Result<Self, PoolError> {
        Self::new(parent, config.deadline_instant(), config.workers)
    }

    /// The context every execution in this pool is bound to.
    pub fn context(&self) -> &ExecContext {
        &self.inner.ctx
    }

    /// Run one command and wait for its result.
    ///
    /// If the pool's context is already done the command fails without
    /// running, and the failure is returned here.
    pub async fn process(&self, command: C, args: C::Args) -> CommandResult {
        if self.inner.is_closed() {
            return Err(PoolError::Closed);
        }
        self.inner.execute(command, args).await
    }

    /// Submit a command without waiting.
    ///
    /// `handler` runs exactly once on a runtime task when the result is ready.
    /// The task counts as outstanding until `handler` has returned.
    pub fn start<F>(&self, command: C, args: C::Args, handler: F)
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        // 先にカウントしてから spawn する（wait が早く抜けないように）
        let guard = self.inner.outstanding.enter();
        let inner = Arc::clone(&self.inner);
        let closed = inner.is_closed();

        tokio::spawn(async move {
            let result = if closed {
                Err(PoolError::Closed)
            } else {
                inner.execute(command, args).await
            };
            handler(result);
            drop(guard);
        });
    }

    /// Wait until every task submitted with `start` has had its handler run.
    ///
    /// New `start` calls remain legal while waiting and extend the wait.
    pub async fn wait(&self) {
        self.inner.outstanding.wait_idle().await;
    }

    /// Cancel everything in flight, wait for outstanding handlers, stop the workers.
    ///
    /// Calls after the first are no-ops apart from waiting again. Submissions made
    /// after `close` fail with `PoolError::Closed`.
    #[instrument(skip(self), fields(workers = self.inner.workers.size()))]
    pub async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(outstanding = self.inner.outstanding.current(), "closing command pool");
        }
        self.inner.ctx.cancel();
        self.wait().await;
        self.inner.workers.shutdown_and_join().await;
        info!(stats = ?self.stats(), "command pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot(
            self.inner.workers.size(),
            self.inner.outstanding.current(),
        )
    }
}

impl<C: Command> Inner<C> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn execute(&self, command: C, args: C::Args) -> CommandResult {
        self.counters.submitted();

        let (reply, rx) = oneshot::channel();
        let job = Job {
            envelope: TaskEnvelope::new(command, args),
            reply,
        };

        let result = match self.workers.submit(job).await {
            Ok(()) => rx.await.unwrap_or_else(|_| Err(PoolError::WorkerGone)),
            Err(e) => Err(e),
        };
        self.counters.record(&result);
        result
    }
}

impl<C: Command> Drop for Inner<C> {
    fn drop(&mut self) {
        // close() されずに捨てられた場合も子プロセスを止める
        self.ctx.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextError;
    use crate::domain::ExecError;
    use crate::impls::{Scripted, Step};
    use crate::ports::Executable;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<CommandResult>>>;

    fn collector() -> (Seen, impl Fn() -> Box<dyn FnOnce(CommandResult) + Send>) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let seen = Arc::clone(&seen);
            move || {
                let seen = Arc::clone(&seen);
                Box::new(move |result: CommandResult| seen.lock().unwrap().push(result))
                    as Box<dyn FnOnce(CommandResult) + Send>
            }
        };
        (seen, make)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn process_returns_output() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let out = pool
            .process(Scripted, Step::succeed(ms(10), "hello"))
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn process_surfaces_failure_with_output() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let err = pool
            .process(Scripted, Step::fail(ms(10), "partial", "exit status: 1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "exit status: 1: partial");
        assert_eq!(err.output(), Some("partial"));
        pool.close().await;
    }

    #[tokio::test]
    async fn rejects_zero_workers() {
        let result = CommandPool::<Scripted>::new(&ExecContext::background(), None, 0);
        assert!(matches!(result, Err(PoolError::InvalidWorkerCount(0))));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(4, 3)]
    #[case(8, 20)]
    #[tokio::test(start_paused = true)]
    async fn every_start_reports_exactly_once(#[case] workers: usize, #[case] tasks: usize) {
        let pool = CommandPool::new(&ExecContext::background(), None, workers).unwrap();
        let (seen, handler) = collector();

        for i in 0..tasks {
            let step = if i % 2 == 0 {
                Step::succeed(ms(5 + i as u64), format!("ok-{i}"))
            } else {
                Step::fail(ms(5 + i as u64), "", "boom")
            };
            pool.start(Scripted, step, handler());
        }
        pool.wait().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), tasks);
        assert_eq!(seen.iter().filter(|r| r.is_ok()).count(), tasks.div_ceil(2));

        let stats = pool.stats();
        assert_eq!(stats.submitted, tasks as u64);
        assert_eq!(stats.succeeded + stats.failed, tasks as u64);
        assert_eq!(stats.outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_in_flight_and_waits_for_handler() {
        let start = Instant::now();
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let (seen, handler) = collector();

        pool.start(Scripted, Step::succeed(Duration::from_secs(10), ""), handler());
        tokio::time::sleep(ms(1)).await;
        pool.close().await;

        assert!(start.elapsed() < Duration::from_secs(10));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].as_ref().unwrap_err().is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn close_right_after_start_still_reports_once() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let (seen, handler) = collector();

        pool.start(Scripted, Step::succeed(Duration::from_secs(10), ""), handler());
        pool.close().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_long_command() {
        let start = Instant::now();
        let pool =
            CommandPool::new(&ExecContext::background(), Some(start + ms(50)), 1).unwrap();
        let (seen, handler) = collector();

        pool.start(Scripted, Step::succeed(Duration::from_secs(10), ""), handler());
        pool.wait().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= ms(50) && elapsed < ms(60), "elapsed {elapsed:?}");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].as_ref().unwrap_err().is_deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn natural_completion_has_no_errors() {
        let start = Instant::now();
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let (seen, handler) = collector();

        pool.start(Scripted, Step::succeed(Duration::from_secs(1), "done"), handler());
        pool.wait().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1010));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_fails_without_hanging() {
        let start = Instant::now();
        let pool = CommandPool::new(&ExecContext::background(), Some(start), 2).unwrap();

        let err = pool
            .process(Scripted, Step::succeed(Duration::from_secs(10), ""))
            .await
            .unwrap_err();
        assert!(err.is_deadline());
        assert!(start.elapsed() < ms(5));
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_parent_cancels_pool() {
        let parent = ExecContext::background();
        let pool = CommandPool::new(&parent, None, 1).unwrap();
        parent.cancel();

        let err = pool
            .process(Scripted, Step::succeed(ms(10), ""))
            .await
            .unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_after_close_are_rejected() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        pool.close().await;

        let err = pool
            .process(Scripted, Step::succeed(ms(1), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Closed));

        let (seen, handler) = collector();
        pool.start(Scripted, Step::succeed(ms(1), ""), handler());
        pool.wait().await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Err(PoolError::Closed)));

        // 二回目の close は何もしない
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_covers_starts_issued_while_waiting() {
        let pool = CommandPool::new(&ExecContext::background(), None, 2).unwrap();
        let (seen, handler) = collector();

        pool.start(Scripted, Step::succeed(ms(100), "first"), handler());
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.wait().await })
        };

        tokio::time::sleep(ms(50)).await;
        pool.start(Scripted, Step::succeed(ms(100), "second"), handler());

        tokio::time::sleep(ms(60)).await;
        assert!(!waiter.is_finished());

        waiter.await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    /// Records how many runs overlap.
    #[derive(Debug, Clone, Default)]
    struct Gauge {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct GaugeRun {
        gauge: Gauge,
    }

    impl Command for Gauge {
        type Args = Duration;
        type Exec = GaugeRun;

        fn resolve(&self, _ctx: &ExecContext, _args: Duration) -> GaugeRun {
            GaugeRun {
                gauge: self.clone(),
            }
        }
    }

    #[async_trait]
    impl Executable for GaugeRun {
        async fn run(self) -> (Vec<u8>, Result<(), ExecError>) {
            let now = self.gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.gauge.running.fetch_sub(1, Ordering::SeqCst);
            (Vec::new(), Ok(()))
        }
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test(start_paused = true)]
    async fn never_runs_more_than_worker_count(#[case] workers: usize) {
        let pool = CommandPool::new(&ExecContext::background(), None, workers).unwrap();
        let gauge = Gauge::default();

        for _ in 0..10 {
            pool.start(gauge.clone(), ms(20), |result| assert!(result.is_ok()));
        }
        pool.wait().await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), workers);
        pool.close().await;
    }

    /// Panics inside `run` when asked to.
    #[derive(Debug, Clone, Copy)]
    struct Boom;

    struct BoomRun {
        explode: bool,
    }

    impl Command for Boom {
        type Args = bool;
        type Exec = BoomRun;

        fn resolve(&self, _ctx: &ExecContext, explode: bool) -> BoomRun {
            BoomRun { explode }
        }
    }

    #[async_trait]
    impl Executable for BoomRun {
        async fn run(self) -> (Vec<u8>, Result<(), ExecError>) {
            if self.explode {
                panic!("boom");
            }
            (b"fine".to_vec(), Ok(()))
        }
    }

    #[tokio::test]
    async fn panicking_command_does_not_take_the_worker_down() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();

        let err = pool.process(Boom, true).await.unwrap_err();
        assert!(matches!(&err, PoolError::Panicked(msg) if msg == "boom"), "got {err}");

        // ワーカーが 1 本でも次のタスクは処理される
        let out = tokio::time::timeout(Duration::from_secs(2), pool.process(Boom, false))
            .await
            .expect("pool hung after a panicking task")
            .unwrap();
        assert_eq!(out, b"fine");

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn panicking_start_still_reports_once() {
        let pool = CommandPool::new(&ExecContext::background(), None, 1).unwrap();
        let (seen, handler) = collector();

        pool.start(Boom, true, handler());
        pool.start(Boom, false, handler());
        tokio::time::timeout(Duration::from_secs(2), pool.wait())
            .await
            .expect("wait hung after a panicking task");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.iter().filter(|r| matches!(r, Err(PoolError::Panicked(_)))).count(), 1);
        assert_eq!(seen.iter().filter(|r| r.is_ok()).count(), 1);
        drop(seen);
        pool.close().await;
    }
}
