//! Error taxonomy of the scheduler.
//!
//! Only [`ConfigurationError`] ever reaches the code that builds a loop.
//! Directory and task errors are contained by the loop and surface through
//! [`CycleReport`](crate::report::CycleReport)s.

use std::time::Duration;

use thiserror::Error;

/// Invalid loop or task configuration, rejected before the first tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("task name must not be empty")]
    EmptyName,

    #[error("task `{task}` has a non-positive interval ({interval:?})")]
    NonPositiveInterval { task: String, interval: Duration },

    #[error("task `{task}` has a tenant concurrency cap of zero")]
    ZeroConcurrency { task: String },

    #[error("task `{task}` is already registered in this loop")]
    DuplicateTask { task: String },

    #[error("scheduler `{scheduler}` has no registered tasks")]
    NoTasks { scheduler: String },

    #[error("scheduler `{scheduler}` has a zero tick period")]
    ZeroTickPeriod { scheduler: String },
}

/// Failure to list the eligible tenants of a task for one cycle.
///
/// Fails that task's cycle only; the task is retried on its next due cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Transient I/O failure (database timeout, dropped connection, ...).
    #[error("transient directory failure: {0}")]
    Transient(String),

    /// The directory cannot answer at all (misconfigured query, missing table, ...).
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Failure of one tenant's task-unit invocation.
///
/// Never propagates past the tenant iterator.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    /// The unit observed the cancellation signal and stopped early.
    ///
    /// Recorded as `Skipped`, not as a failure.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
