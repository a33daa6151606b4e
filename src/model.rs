use std::fmt;


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorMetrics {
    pub live_workers: usize,
    pub idle_workers: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl ExecutorMetrics {
    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        let busy = self.live_workers.saturating_sub(self.idle_workers);
        busy as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}


/// Lifecycle of the worker pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PoolState {
    Running = 0,
    Draining = 1,
    Terminated = 2,
}

impl PoolState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolState::Running,
            1 => PoolState::Draining,
            _ => PoolState::Terminated,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}


/// How a call to `shutdown` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Every queued and in-flight task finished inside the bound.
    Graceful,
    /// The bound elapsed; `abandoned` tasks were dropped unfinished.
    Forced { abandoned: usize },
    AlreadyTerminated,
}

impl ShutdownReport {
    pub fn is_forced(&self) -> bool {
        matches!(self, ShutdownReport::Forced { .. })
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub batches: usize,
    pub items: usize,
    pub failed_items: usize,
}


/// Items after `update_all_sync`, in input order, plus the positions whose
/// update failed and were left untouched.
#[derive(Debug)]
pub struct UpdateReport<T> {
    pub items: Vec<T>,
    pub failed: Vec<usize>,
}

impl<T> UpdateReport<T> {
    pub fn updated(&self) -> usize {
        self.items.len() - self.failed.len()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
