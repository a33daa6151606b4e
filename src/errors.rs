use crate::model::PoolState;
use thiserror::Error;


/// Outcome of a single task as seen through its handle.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("task cancelled")]
    Cancelled,
    #[error("task abandoned by forced shutdown")]
    Abandoned,
    #[error("timed out waiting for task")]
    Timeout,
}

/// Errors surfaced by executor operations as a whole.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ExecutorError {
    #[error("pool is {0} and no longer accepts work")]
    NotAccepting(PoolState),
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("wait interrupted by caller cancellation")]
    Interrupted,
    #[error("batch dispatch timed out after {dispatched} of {total} batches")]
    BatchTimedOut { dispatched: usize, total: usize },
    #[error("task {index} failed: {source}")]
    Aggregate {
        index: usize,
        #[source]
        source: TaskError,
    },
}

/// Argument errors from the sort/search engine.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum SortError {
    #[error("bucket count must be positive, got {0}")]
    InvalidBucketCount(usize),
    #[error("invalid price bounds [{min}, {max}]")]
    InvalidPriceBounds { min: f64, max: f64 },
}
