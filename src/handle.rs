use super::{
    errors::TaskError,
    result::TaskResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::{
    sync::oneshot,
    time::Duration,
};
use tokio_util::sync::CancellationToken;


/// Queued unit of work; resolves to `true` when the task succeeded.
pub type Task = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;


/// Handle on one submitted task. Resolves to the task's value or its failure
/// and never depends on any sibling handle.
///
/// A sender dropped without a value means the pool abandoned the task during
/// forced shutdown, reported as [`TaskError::Abandoned`].
pub struct JoinHandle<T> {
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<TaskResult<T>>,
}

impl<T> JoinHandle<T> {

    pub(crate) fn new
    (
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<TaskResult<T>>,
    ) -> Self {
        Self {
            cancel_token,
            receiver
        }
    }

    /// Requests cancellation. A task that has not started yet never runs; a
    /// running callable finishes but its value is discarded.
    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub async fn await_timeout(self, timeout: Duration) -> TaskResult<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TaskError::Abandoned),
            Err(_) => Err(TaskError::Timeout),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(TaskError::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}
