use super::errors::{ExecutorError, SortError, TaskError};

pub type TaskResult<T> = Result<T, TaskError>;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

pub type SortResult<T> = Result<T, SortError>;
