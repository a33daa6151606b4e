use super::{
    errors::{ExecutorError, TaskError},
    handle::JoinHandle,
    model::{BatchReport, ExecutorMetrics, PoolState, ShutdownReport, UpdateReport},
    pool::{Config, PoolCore, WorkerPool},
    result::{ExecutorResult, TaskResult},
    scheduler::{DelayScheduler, SchedulerHandle},
    wait_group::{Ticket, WaitGroup},
};
use std::{
    fmt::Display,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use crossbeam::queue::SegQueue;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Pool-backed executor for per-item work over in-memory collections.
///
/// All operations enqueue without blocking; the `async` ones suspend the
/// caller until their results are in. Collections handed back always follow
/// input order, whatever order the tasks finished in.
///
/// The executor isolates tasks from each other, not the data they touch: if
/// two operations run over items that share state, the caller serializes
/// access.
pub struct TaskExecutor {
    pool: WorkerPool,
    scheduler: DelayScheduler,
}

impl TaskExecutor {
    /// Executor sized to host parallelism. Must be called inside a tokio
    /// runtime.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            pool: WorkerPool::with_config(config),
            scheduler: DelayScheduler::start(),
        }
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    #[inline]
    pub fn metrics(&self) -> ExecutorMetrics {
        self.pool.metrics()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        self.pool.config()
    }

    fn ensure_running(&self) -> ExecutorResult<()> {
        match self.pool.state() {
            PoolState::Running => Ok(()),
            state => Err(ExecutorError::NotAccepting(state)),
        }
    }

    /// Runs `transform` on every item, one task each. Handles come back in
    /// input order and resolve independently of one another.
    pub fn submit_parallel<T, R, E, F>(&self, items: Vec<T>, transform: F) -> ExecutorResult<Vec<JoinHandle<R>>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let transform = Arc::new(transform);

        items
            .into_iter()
            .map(|item| {
                let transform = Arc::clone(&transform);
                self.pool.submit(move || fallible(transform(item)))
            })
            .collect()
    }

    /// Side-effecting variant of [`submit_parallel`](Self::submit_parallel).
    /// A failing action only fails its own handle.
    pub fn for_each_parallel<T, E, F>(&self, items: Vec<T>, action: F) -> ExecutorResult<Vec<JoinHandle<()>>>
    where
        T: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        self.submit_parallel(items, action)
    }

    /// Replaces every item with `update(&item)` in parallel and waits for all
    /// of them.
    ///
    /// A failing or panicking update is logged and leaves that item as it
    /// was; it never stops the rest of the batch.
    pub async fn update_all_sync<T, E, F>(&self, items: Vec<T>, update: F) -> ExecutorResult<UpdateReport<T>>
    where
        T: Send + 'static,
        E: Display + 'static,
        F: Fn(&T) -> Result<T, E> + Send + Sync + 'static,
    {
        self.update_all_sync_until(items, update, &CancellationToken::new()).await
    }

    /// [`update_all_sync`](Self::update_all_sync) whose wait can be
    /// interrupted through `cancel`.
    ///
    /// On interruption the call returns [`ExecutorError::Interrupted`] and
    /// leaves `cancel` cancelled for the caller to observe. Tasks already
    /// queued still run; their results are dropped.
    ///
    /// The items are moved into their tasks, so every error path loses them,
    /// updated or not: an interrupted wait, and a forced shutdown that drops
    /// queued tasks before they run. Callers that need the collection back
    /// after a failure keep their own copy.
    pub async fn update_all_sync_until<T, E, F>(
        &self,
        items: Vec<T>,
        update: F,
        cancel: &CancellationToken,
    ) -> ExecutorResult<UpdateReport<T>>
    where
        T: Send + 'static,
        E: Display + 'static,
        F: Fn(&T) -> Result<T, E> + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let total = items.len();
        let update = Arc::new(update);
        let finished: Arc<SegQueue<(usize, T, bool)>> = Arc::new(SegQueue::new());
        let done = WaitGroup::new();

        for (index, item) in items.into_iter().enumerate() {
            let update = Arc::clone(&update);
            let finished = Arc::clone(&finished);
            let ticket = done.ticket();

            // The handle is not needed: the ticket counts the task down and
            // the item comes back through `finished`.
            let _ = self.pool.submit(move || {
                let _ticket = ticket;
                match catch_unwind(AssertUnwindSafe(|| update(&item))) {
                    Ok(Ok(updated)) => finished.push((index, updated, true)),
                    Ok(Err(e)) => {
                        warn!(index, error = %e, "update failed, item left unchanged");
                        finished.push((index, item, false));
                    }
                    Err(_) => {
                        warn!(index, "update panicked, item left unchanged");
                        finished.push((index, item, false));
                    }
                }
                Ok(())
            })?;
        }

        if !done.wait_until(cancel).await {
            warn!(pending = done.pending(), "interrupted while waiting for updates");
            return Err(ExecutorError::Interrupted);
        }

        let mut slots: Vec<Option<(T, bool)>> = (0..total).map(|_| None).collect();
        while let Some((index, item, ok)) = finished.pop() {
            slots[index] = Some((item, ok));
        }

        let mut report = UpdateReport { items: Vec::with_capacity(total), failed: Vec::new() };
        for (index, slot) in slots.into_iter().enumerate() {
            // A missing slot means a forced shutdown dropped the task unrun.
            let (item, ok) = slot.ok_or(ExecutorError::NotAccepting(self.pool.state()))?;
            if !ok {
                report.failed.push(index);
            }
            report.items.push(item);
        }

        debug!(total, failed = report.failed.len(), "update batch finished");
        Ok(report)
    }

    /// Dispatches `items` in contiguous batches of `batch_size`, batch `i` no
    /// earlier than `i * delay` after the call.
    ///
    /// Items of a dispatched batch run concurrently on the pool; batches run
    /// one after another. Waits at most `items.len() * delay` plus the
    /// configured grace, then cancels what is left and reports
    /// [`ExecutorError::BatchTimedOut`].
    pub async fn batch_with_delay<T, E, F>(
        &self,
        items: Vec<T>,
        action: F,
        batch_size: usize,
        delay: Duration,
    ) -> ExecutorResult<BatchReport>
    where
        T: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        self.batch_with_delay_until(items, action, batch_size, delay, &CancellationToken::new()).await
    }

    /// [`batch_with_delay`](Self::batch_with_delay) whose wait can be
    /// interrupted through `cancel`.
    ///
    /// On interruption the call returns [`ExecutorError::Interrupted`] and
    /// leaves `cancel` cancelled for the caller to observe. Batches not yet
    /// started never run, and items of a running batch are cancelled.
    pub async fn batch_with_delay_until<T, E, F>(
        &self,
        items: Vec<T>,
        action: F,
        batch_size: usize,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> ExecutorResult<BatchReport>
    where
        T: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        if batch_size == 0 {
            return Err(ExecutorError::InvalidBatchSize);
        }
        self.ensure_running()?;

        let total_items = items.len();
        let batches = split_into_batches(items, batch_size);
        let total = batches.len();

        let batch_cancel = cancel.child_token();
        let dispatched = Arc::new(AtomicUsize::new(0));
        let failed_items = Arc::new(AtomicUsize::new(0));
        let done = WaitGroup::new();

        let chain = BatchChain {
            remaining: batches.into_iter(),
            next_index: 0,
            started: Instant::now(),
            delay,
            core: Arc::clone(self.pool.core()),
            scheduler: self.scheduler.handle(),
            action: Arc::new(move |item| fallible(action(item))),
            cancel: batch_cancel.clone(),
            dispatched: Arc::clone(&dispatched),
            failed_items: Arc::clone(&failed_items),
            _ticket: done.ticket(),
        };
        if let Err(e) = chain.schedule_next() {
            batch_cancel.cancel();
            return Err(e);
        }

        let bound = delay.saturating_mul(u32::try_from(total_items).unwrap_or(u32::MAX))
            + self.pool.config().batch_grace();

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            finished = done.wait_timeout(bound) => Some(finished),
        };

        let dispatched = dispatched.load(Ordering::Acquire);
        match finished {
            None => {
                batch_cancel.cancel();
                warn!(dispatched, total, "batch dispatch interrupted");
                Err(ExecutorError::Interrupted)
            }
            Some(false) => {
                batch_cancel.cancel();
                warn!(dispatched, total, ?bound, "batch dispatch timed out, cancelling remaining work");
                Err(ExecutorError::BatchTimedOut { dispatched, total })
            }
            // A chain dropped by a stopped scheduler also counts the group down.
            Some(true) if dispatched < total => Err(ExecutorError::NotAccepting(self.pool.state())),
            Some(true) => Ok(BatchReport {
                batches: total,
                items: total_items,
                failed_items: failed_items.load(Ordering::Acquire),
            }),
        }
    }

    /// Runs `transform` on every item and succeeds only if all of them do.
    ///
    /// The first failure observed cancels the remaining tasks and fails the
    /// whole call; no partial results are returned. Values come back in
    /// input order.
    pub async fn compute_all<T, R, E, F>(&self, items: Vec<T>, transform: F) -> ExecutorResult<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let total = items.len();
        let group = CancellationToken::new();
        let transform = Arc::new(transform);
        let mut pending = FuturesUnordered::new();

        for (index, item) in items.into_iter().enumerate() {
            let transform = Arc::clone(&transform);
            match self.pool.core().submit(group.child_token(), move || fallible(transform(item))) {
                Ok(handle) => pending.push(async move { (index, handle.await) }),
                Err(e) => {
                    group.cancel();
                    return Err(e);
                }
            }
        }

        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(value) => results[index] = Some(value),
                Err(source) => {
                    group.cancel();
                    warn!(index, error = %source, "compute_all failed fast");
                    return Err(ExecutorError::Aggregate { index, source });
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Drains the pool within the configured shutdown timeout, forcing
    /// cancellation past it, and stops the delay scheduler. Safe to call more
    /// than once.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.pool.shutdown().await;
        self.scheduler.stop().await;
        report
    }

    pub async fn shutdown_timeout(&self, timeout: Duration) -> ShutdownReport {
        let report = self.pool.shutdown_timeout(timeout).await;
        self.scheduler.stop().await;
        report
    }
}


type BatchAction<T> = Arc<dyn Fn(T) -> TaskResult<()> + Send + Sync>;

/// Batches of one `batch_with_delay` call still to run. Each batch schedules
/// the next only after its own items have finished, so a call never overlaps
/// its batches while batches of other calls interleave freely. Dropping the
/// chain, run or not, releases its ticket.
struct BatchChain<T> {
    remaining: std::vec::IntoIter<Vec<T>>,
    next_index: usize,
    started: Instant,
    delay: Duration,
    core: Arc<PoolCore>,
    scheduler: SchedulerHandle,
    action: BatchAction<T>,
    cancel: CancellationToken,
    dispatched: Arc<AtomicUsize>,
    failed_items: Arc<AtomicUsize>,
    _ticket: Ticket,
}

impl<T: Send + 'static> BatchChain<T> {
    /// Batch `i` is due `i * delay` after the call; a batch that finishes
    /// late releases the next one straight away.
    fn schedule_next(mut self) -> ExecutorResult<()> {
        let Some(batch) = self.remaining.next() else {
            return Ok(());
        };
        let index = self.next_index;
        let at = self.started + self.delay.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
        let scheduler = self.scheduler.clone();
        let cancel = self.cancel.clone();
        scheduler.schedule(at, cancel, Box::pin(self.run(batch, index)))
    }

    async fn run(mut self, batch: Vec<T>, index: usize) {
        self.dispatched.fetch_add(1, Ordering::AcqRel);
        info!(batch = index, items = batch.len(), "processing batch");

        let handles: Vec<_> = batch
            .into_iter()
            .map(|item| {
                let action = Arc::clone(&self.action);
                self.core.submit(self.cancel.child_token(), move || action(item))
            })
            .collect();

        for handle in handles {
            let outcome = match handle {
                Ok(handle) => handle.await,
                Err(e) => Err(TaskError::Failed(e.to_string())),
            };
            if let Err(e) = outcome {
                warn!(batch = index, error = %e, "item in batch failed");
                self.failed_items.fetch_add(1, Ordering::AcqRel);
            }
        }

        info!(batch = index, "completed batch");
        self.next_index = index + 1;
        if let Err(e) = self.schedule_next() {
            warn!(batch = index + 1, error = %e, "could not schedule next batch");
        }
    }
}


fn fallible<R, E: Display>(outcome: Result<R, E>) -> TaskResult<R> {
    outcome.map_err(|e| TaskError::Failed(e.to_string()))
}

/// Splits `items` into contiguous chunks of `batch_size`, the last possibly
/// shorter.
pub(crate) fn split_into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size.max(1)));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(batch_size).collect());
    }
    batches
}
