use super::{
    errors::{ExecutorError, TaskError},
    result::{ExecutorResult, TaskResult},
    handle::{
        Task,
        JoinHandle,
    },
    model::{
        ExecutorMetrics,
        PoolState,
        ShutdownReport,
    },
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::pin,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use crossbeam::deque::{Injector, Steal};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{oneshot, Notify},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_workers: usize,
    pub shutdown_timeout_ms: u64,
    pub batch_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            shutdown_timeout_ms: 60_000,
            batch_grace_ms: 5_000,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self::default()
    }

    pub fn io_bound() -> Self {
        Self {
            num_workers: num_cpus::get() * 2,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_batch_grace(mut self, grace: Duration) -> Self {
        self.batch_grace_ms = grace.as_millis() as u64;
        self
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[inline]
    pub fn batch_grace(&self) -> Duration {
        Duration::from_millis(self.batch_grace_ms)
    }
}


/// State shared between the pool handle and its workers.
pub(crate) struct PoolCore {
    inject: Injector<Task>,
    work_notify: Notify,
    /// Cancelled to stop the workers; in-flight tasks are dropped when this
    /// fires before they finish.
    stop_token: CancellationToken,
    /// Cancelled once the pool reaches `Terminated`.
    terminated: CancellationToken,
    state: AtomicU8,
    active_tasks: AtomicUsize,
    all_tasks_completed: Notify,
    live_workers: AtomicUsize,
    idle_workers: AtomicUsize,
    queued_tasks: AtomicUsize,
    total_submitted: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
}

impl PoolCore {
    fn new() -> Self {
        Self {
            inject: Injector::new(),
            work_notify: Notify::new(),
            stop_token: CancellationToken::new(),
            terminated: CancellationToken::new(),
            state: AtomicU8::new(PoolState::Running as u8),
            active_tasks: AtomicUsize::new(0),
            all_tasks_completed: Notify::new(),
            live_workers: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            total_submitted: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline(always)]
    fn push_task(&self, task: Task) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        self.queued_tasks.fetch_add(1, Ordering::Relaxed);
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        self.inject.push(task);
        self.work_notify.notify_one();

        // Lost the race against a forced shutdown; nobody will run it.
        if self.state() == PoolState::Terminated {
            self.discard_queued();
        }
    }

    fn steal(&self) -> Option<Task> {
        std::iter::repeat_with(|| self.inject.steal())
            .find(|s| !s.is_retry())
            .and_then(Steal::success)
    }

    fn discard_queued(&self) -> usize {
        let mut dropped = 0;
        while let Some(task) = self.steal() {
            drop(task);
            dropped += 1;
            self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            self.finish_task();
        }
        dropped
    }

    fn finish_task(&self) {
        // Saturates: a forced shutdown may already have zeroed the count.
        let previous = self
            .active_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.all_tasks_completed.notify_waiters();
        }
    }

    /// Enqueues `job` and returns its handle immediately. The job runs on the
    /// blocking pool; the worker that picked it up awaits it, so at most
    /// `num_workers` jobs execute at once.
    pub(crate) fn submit<R, F>(&self, cancel_token: CancellationToken, job: F) -> ExecutorResult<JoinHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> TaskResult<R> + Send + 'static,
    {
        let state = self.state();
        if state != PoolState::Running {
            return Err(ExecutorError::NotAccepting(state));
        }

        let (tx, rx) = oneshot::channel::<TaskResult<R>>();
        let ct = cancel_token.clone();

        let task: Task = Box::pin(async move {
            if ct.is_cancelled() {
                let _ = tx.send(Err(TaskError::Cancelled));
                return false;
            }

            let result: TaskResult<R> = tokio::select! {
                biased;
                _ = ct.cancelled() => Err(TaskError::Cancelled),
                joined = tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(job))) => {
                    match joined {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(panic_info)) => Err(TaskError::Panic(panic_message(panic_info))),
                        Err(join_err) => Err(TaskError::Panic(join_err.to_string())),
                    }
                }
            };

            let ok = result.is_ok();
            let _ = tx.send(result);
            ok
        });

        self.push_task(task);

        Ok(JoinHandle::new(cancel_token, rx))
    }

    pub(crate) async fn join_all(&self) {
        loop {
            let mut notified = pin!(self.all_tasks_completed.notified());
            notified.as_mut().enable();
            if self.active_tasks.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) async fn join_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join_all()).await.is_ok()
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        debug!(worker = id, "worker started");

        'outer: loop {
            if self.stop_token.is_cancelled() {
                break;
            }

            if let Some(task) = self.steal() {
                self.queued_tasks.fetch_sub(1, Ordering::Relaxed);

                let ok = tokio::select! {
                    biased;
                    _ = self.stop_token.cancelled() => break 'outer,
                    ok = task => ok,
                };

                if ok {
                    self.completed_tasks.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.failed_tasks.fetch_add(1, Ordering::Relaxed);
                }
                self.finish_task();
            } else {
                self.idle_workers.fetch_add(1, Ordering::AcqRel);

                // notify_one leaves a permit behind when nobody is waiting, so
                // a push racing with this check still wakes us.
                tokio::select! {
                    _ = self.work_notify.notified() => {
                        self.idle_workers.fetch_sub(1, Ordering::AcqRel);
                    }
                    _ = self.stop_token.cancelled() => {
                        self.idle_workers.fetch_sub(1, Ordering::AcqRel);
                        break 'outer;
                    }
                }
            }
        }

        self.live_workers.fetch_sub(1, Ordering::AcqRel);
        debug!(worker = id, "worker stopped");
    }

    pub(crate) fn metrics(&self) -> ExecutorMetrics {
        ExecutorMetrics {
            live_workers: self.live_workers.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }
}


/// Fixed set of workers draining one shared queue.
///
/// Must be created inside a tokio runtime. Lifecycle is
/// `Running -> Draining -> Terminated`; see [`WorkerPool::shutdown`].
pub struct WorkerPool {
    core: Arc<PoolCore>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    config: Config,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        Self::with_config(Config::default().with_workers(num_workers))
    }

    pub fn with_config(config: Config) -> Self {
        let core = Arc::new(PoolCore::new());
        let num_workers = config.num_workers.max(1);

        let workers = (0..num_workers)
            .map(|id| {
                core.live_workers.fetch_add(1, Ordering::AcqRel);
                tokio::spawn(core.clone().worker_loop(id))
            })
            .collect();

        debug!(workers = num_workers, "worker pool started");

        Self {
            core,
            workers: Mutex::new(workers),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.core.state()
    }

    #[inline]
    pub fn metrics(&self) -> ExecutorMetrics {
        self.core.metrics()
    }

    #[inline]
    pub(crate) fn core(&self) -> &Arc<PoolCore> {
        &self.core
    }

    pub fn submit<R, F>(&self, job: F) -> ExecutorResult<JoinHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> TaskResult<R> + Send + 'static,
    {
        self.core.submit(CancellationToken::new(), job)
    }

    /// Waits until every submitted task has finished.
    pub async fn join_all(&self) {
        self.core.join_all().await
    }

    pub async fn join_all_timeout(&self, timeout: Duration) -> bool {
        self.core.join_all_timeout(timeout).await
    }

    /// Stops accepting work and drains the queue for at most the configured
    /// shutdown timeout, then cancels whatever is left. Calling it again, or
    /// concurrently, waits for termination and reports `AlreadyTerminated`.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_timeout(self.config.shutdown_timeout()).await
    }

    pub async fn shutdown_timeout(&self, timeout: Duration) -> ShutdownReport {
        let core = &self.core;
        let claimed = core.state.compare_exchange(
            PoolState::Running as u8,
            PoolState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if claimed.is_err() {
            core.terminated.cancelled().await;
            return ShutdownReport::AlreadyTerminated;
        }

        info!(active = core.active_tasks.load(Ordering::Relaxed), "draining worker pool");
        let drained = core.join_all_timeout(timeout).await;

        core.stop_token.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            let _ = worker.await;
        }

        core.state.store(PoolState::Terminated as u8, Ordering::Release);
        // Whatever is still counted active was in flight when the workers stopped.
        let dropped = core.discard_queued();
        let abandoned = dropped + core.active_tasks.swap(0, Ordering::AcqRel);
        core.all_tasks_completed.notify_waiters();
        core.terminated.cancel();

        if drained {
            info!("worker pool terminated");
            ShutdownReport::Graceful
        } else {
            warn!(abandoned, ?timeout, "shutdown timed out, forced cancellation");
            ShutdownReport::Forced { abandoned }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.core.state() != PoolState::Terminated {
            self.core.state.store(PoolState::Terminated as u8, Ordering::Release);
            self.core.stop_token.cancel();
            self.core.discard_queued();
            self.core.terminated.cancel();
        }
    }
}


fn panic_message(panic_info: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in task".to_string()
    }
}
