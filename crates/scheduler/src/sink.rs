//! Reporting sinks for cycle reports.
//!
//! Sinks are fire-and-forget: the loop calls `emit` once per report and never
//! waits on, or reacts to, a sink failing. Implementations must not block.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::report::CycleReport;

/// Receives one [`CycleReport`] per task per cycle.
pub trait ReportSink: Send + Sync + 'static {
    fn emit(&self, report: &CycleReport);
}

impl<S> ReportSink for Arc<S>
where
    S: ReportSink + ?Sized,
{
    fn emit(&self, report: &CycleReport) {
        (**self).emit(report)
    }
}

/// Default sink: one structured log line per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn emit(&self, report: &CycleReport) {
        if let Some(error) = &report.directory_error {
            warn!(
                task = %report.task_name,
                cycle = %report.cycle_id,
                error = %error,
                "cycle failed: could not resolve tenants"
            );
            return;
        }

        if report.failed() > 0 {
            let failed: Vec<&str> = report.failed_tenants().map(|t| t.as_str()).collect();
            warn!(
                task = %report.task_name,
                cycle = %report.cycle_id,
                succeeded = report.succeeded(),
                failed = report.failed(),
                skipped = report.skipped(),
                failed_tenants = ?failed,
                duration_ms = report.duration.as_millis() as u64,
                interrupted = report.interrupted,
                "cycle completed with failures"
            );
        } else {
            info!(
                task = %report.task_name,
                cycle = %report.cycle_id,
                succeeded = report.succeeded(),
                skipped = report.skipped(),
                duration_ms = report.duration.as_millis() as u64,
                interrupted = report.interrupted,
                "cycle completed"
            );
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReportSink {
    inner: Mutex<Vec<CycleReport>>,
}

impl InMemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<CycleReport> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reports for one task, in emission order.
    pub fn for_task(&self, task_name: &str) -> Vec<CycleReport> {
        self.all()
            .into_iter()
            .filter(|r| r.task_name == task_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for InMemoryReportSink {
    fn emit(&self, report: &CycleReport) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

/// Forwards every report to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ReportSink) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl ReportSink for FanoutSink {
    fn emit(&self, report: &CycleReport) {
        for sink in &self.sinks {
            sink.emit(report);
        }
    }
}
