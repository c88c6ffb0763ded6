//! `shopworks-scheduler` — multi-tenant periodic task scheduling.
//!
//! A [`SchedulerLoop`] hosts one or more [`TaskDefinition`]s. On every tick the
//! [`CadenceComposer`] decides which tasks are due; each due task resolves its
//! tenants through a [`TenantDirectory`] and the [`TenantIterator`] runs the
//! task's [`TaskUnit`] once per tenant, isolated and with bounded parallelism.
//! Every cycle produces a [`CycleReport`] handed to a [`ReportSink`].
//!
//! Failures never escape a cycle: a tenant failure is one `Failed` outcome, a
//! directory failure is one task-level failure, and the loop keeps ticking.

pub mod cadence;
pub mod clock;
pub mod error;
pub mod host;
pub mod iterator;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod task;

pub use cadence::CadenceComposer;
pub use clock::Ticker;
pub use error::{ConfigurationError, DirectoryError, TaskError};
pub use host::{HostShutdown, SchedulerHost};
pub use iterator::TenantIterator;
pub use report::{CycleOutcome, CycleReport, OutcomeStatus};
pub use scheduler::{
    LoopSettings, LoopStats, SchedulerHandle, SchedulerLoop, SchedulerLoopBuilder, SchedulerState,
};
pub use sink::{FanoutSink, InMemoryReportSink, ReportSink, TracingReportSink};
pub use task::{
    DEFAULT_TENANT_CONCURRENCY, FnTaskUnit, FnTenantDirectory, TaskContext, TaskDefinition,
    TaskSettings, TaskUnit, TenantDirectory, directory_fn, unit_fn,
};

// Re-exported so collaborators can name the cancellation type without a direct dependency.
pub use tokio_util::sync::CancellationToken;
