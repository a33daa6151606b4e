//! In-memory item processing for inventory services.
//!
//! # Features
//! - Comparator-driven merge sort, quick sort and binary search
//! - Nearest-price search and bucket sort by price
//! - Fixed-size worker pool draining one shared queue
//! - Parallel map/for-each with per-item handles
//! - Synchronous all-complete updates with partial-failure tolerance
//! - Delayed batch dispatch through a single scheduler
//! - Fail-fast all-succeed combinator
//! - Graceful shutdown with forced cancellation on timeout

pub mod errors;
pub mod executor;
pub mod handle;
pub mod inventory;
pub mod item;
pub mod model;
pub mod pool;
pub mod result;
pub mod scheduler;
pub mod sorting;
pub mod wait_group;

pub use errors::{ExecutorError, SortError, TaskError};
pub use executor::TaskExecutor;
pub use handle::JoinHandle;
pub use item::{Categorized, Priced, Product, Stocked};
pub use model::{BatchReport, ExecutorMetrics, PoolState, ShutdownReport, UpdateReport};
pub use pool::{Config, WorkerPool};
