//! Single dispatch task for delayed jobs.
//!
//! Pending jobs are kept in deadline order and each is released onto the
//! runtime once its deadline passes. Only the release decision is serialized
//! here: the dispatcher never awaits a job, so a long job cannot hold back
//! one that is due.

use super::{
    errors::ExecutorError,
    model::PoolState,
    result::ExecutorResult,
};
use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
};
use futures::StreamExt;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::{sync::CancellationToken, time::DelayQueue};
use tracing::debug;


pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Scheduled {
    at: Instant,
    cancel: CancellationToken,
    job: Job,
}

/// Cloneable sending side of a [`DelayScheduler`]. Jobs may hold one to
/// schedule their own follow-up.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<Scheduled>,
    stop_token: CancellationToken,
}

impl SchedulerHandle {
    /// Queues `job` to start at `at`. A job whose `cancel` fires before it
    /// starts is dropped unrun; one that fires while it runs is dropped at its
    /// next await point.
    pub fn schedule(&self, at: Instant, cancel: CancellationToken, job: Job) -> ExecutorResult<()> {
        if self.stop_token.is_cancelled() {
            return Err(ExecutorError::NotAccepting(PoolState::Terminated));
        }
        self.sender
            .send(Scheduled { at, cancel, job })
            .map_err(|_| ExecutorError::NotAccepting(PoolState::Terminated))
    }
}

pub struct DelayScheduler {
    handle: SchedulerHandle,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DelayScheduler {
    /// Spawns the dispatch task on the current tokio runtime.
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop_token = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(receiver, stop_token.clone()));

        Self {
            handle: SchedulerHandle { sender, stop_token },
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn schedule(&self, at: Instant, cancel: CancellationToken, job: Job) -> ExecutorResult<()> {
        self.handle.schedule(at, cancel, job)
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.stop_token.is_cancelled()
    }

    /// Stops the dispatch task. Pending jobs are dropped and released ones
    /// are dropped at their next await point. Idempotent.
    pub async fn stop(&self) {
        self.handle.stop_token.cancel();
        let dispatcher = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.handle.stop_token.cancel();
    }
}


async fn dispatch_loop(mut receiver: mpsc::UnboundedReceiver<Scheduled>, stop_token: CancellationToken) {
    let mut pending: DelayQueue<Scheduled> = DelayQueue::new();
    let mut open = true;

    loop {
        if !open && pending.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_token.cancelled() => break,
            next = receiver.recv(), if open => match next {
                Some(scheduled) if scheduled.cancel.is_cancelled() => {}
                Some(scheduled) => {
                    let at = scheduled.at;
                    pending.insert_at(scheduled, at);
                }
                None => open = false,
            },
            Some(expired) = pending.next(), if !pending.is_empty() => {
                release(expired.into_inner(), &stop_token);
            }
        }
    }

    receiver.close();
    debug!(dropped = pending.len(), "delay scheduler stopped");
}

fn release(scheduled: Scheduled, stop_token: &CancellationToken) {
    let Scheduled { cancel, job, .. } = scheduled;
    if cancel.is_cancelled() {
        return;
    }

    let stop_token = stop_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = stop_token.cancelled() => {}
            _ = cancel.cancelled() => debug!("scheduled job cancelled mid-run"),
            _ = job => {}
        }
    });
}
