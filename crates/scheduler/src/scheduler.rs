//! Scheduler loop: one control task driving a ticker, a cadence composer and
//! the tenant iterator.
//!
//! Lifecycle: `Created -> Running -> Stopping -> Stopped`. Starting consumes
//! the loop, so a loop runs at most once. Within one loop, due tasks run
//! sequentially in registration order and cycles never overlap. Independent
//! loops share nothing but the cancellation signal.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use shopworks_core::CycleId;

use crate::cadence::CadenceComposer;
use crate::clock::Ticker;
use crate::error::ConfigurationError;
use crate::iterator::TenantIterator;
use crate::report::CycleReport;
use crate::sink::{ReportSink, TracingReportSink};
use crate::task::{TaskDefinition, TaskSettings};

/// Lifecycle state of a scheduler loop. Ordered by progression.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Running counters of one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub cycles: u64,
    pub directory_failures: u64,
    pub tenants_succeeded: u64,
    pub tenants_failed: u64,
    pub tenants_skipped: u64,
}

impl LoopStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        if report.is_task_failure() {
            self.directory_failures += 1;
        }
        self.tenants_succeeded += report.succeeded() as u64;
        self.tenants_failed += report.failed() as u64;
        self.tenants_skipped += report.skipped() as u64;
    }
}

/// Configuration of one loop: optional tick period plus its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Tick period; defaults to the smallest task interval or startup grace.
    pub tick_secs: Option<u64>,
    pub tasks: Vec<TaskSettings>,
}

impl LoopSettings {
    pub fn tick(&self) -> Option<Duration> {
        self.tick_secs.map(Duration::from_secs)
    }

    pub fn task(&self, name: &str) -> Option<&TaskSettings> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

type SharedStats = Arc<Mutex<LoopStats>>;

fn snapshot(stats: &SharedStats) -> LoopStats {
    stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Builder for [`SchedulerLoop`]. Registration happens only here, before start.
pub struct SchedulerLoopBuilder {
    name: String,
    tick: Option<Duration>,
    sink: Arc<dyn ReportSink>,
    tasks: Vec<Arc<TaskDefinition>>,
}

impl SchedulerLoopBuilder {
    /// Fixed tick period. Defaults to the smallest registered interval or
    /// non-zero startup grace.
    pub fn tick_every(mut self, period: Duration) -> Self {
        self.tick = Some(period);
        self
    }

    /// Destination of cycle reports. Defaults to [`TracingReportSink`].
    pub fn sink(mut self, sink: impl ReportSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Register a task. Rejects invalid definitions and duplicate names.
    pub fn register(mut self, definition: TaskDefinition) -> Result<Self, ConfigurationError> {
        definition.validate()?;
        if self.tasks.iter().any(|t| t.name() == definition.name()) {
            return Err(ConfigurationError::DuplicateTask {
                task: definition.name().to_string(),
            });
        }
        self.tasks.push(Arc::new(definition));
        Ok(self)
    }

    pub fn build(self) -> Result<SchedulerLoop, ConfigurationError> {
        // Non-zero graces count too, so a first run is never pushed back by a
        // whole interval. The tick is a minimum, not a common divisor: an
        // interval that is not a multiple of the tick fires on the first tick
        // at or after it is due (10m interval, 3m tick: every 12m). Set
        // `tick_every` explicitly when that lag matters.
        let default_tick = self
            .tasks
            .iter()
            .flat_map(|t| [t.interval(), t.startup_grace()])
            .filter(|d| !d.is_zero())
            .min();
        let Some(default_tick) = default_tick else {
            return Err(ConfigurationError::NoTasks { scheduler: self.name });
        };
        let tick = self.tick.unwrap_or(default_tick);
        if tick.is_zero() {
            return Err(ConfigurationError::ZeroTickPeriod { scheduler: self.name });
        }

        let (state, _) = watch::channel(SchedulerState::Created);
        Ok(SchedulerLoop {
            name: self.name,
            tick,
            sink: self.sink,
            tasks: self.tasks,
            state,
            stats: Arc::new(Mutex::new(LoopStats::default())),
        })
    }
}

impl core::fmt::Debug for SchedulerLoopBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let tasks: Vec<&str> = self.tasks.iter().map(|t| t.name()).collect();
        f.debug_struct("SchedulerLoopBuilder")
            .field("name", &self.name)
            .field("tick", &self.tick)
            .field("tasks", &tasks)
            .finish_non_exhaustive()
    }
}

/// A configured, not yet started, scheduler loop.
pub struct SchedulerLoop {
    name: String,
    tick: Duration,
    sink: Arc<dyn ReportSink>,
    tasks: Vec<Arc<TaskDefinition>>,
    state: watch::Sender<SchedulerState>,
    stats: SharedStats,
}

impl SchedulerLoop {
    pub fn builder(name: impl Into<String>) -> SchedulerLoopBuilder {
        SchedulerLoopBuilder {
            name: name.into(),
            tick: None,
            sink: Arc::new(TracingReportSink),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Registered task names, in registration order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Spawn the loop onto the current runtime.
    ///
    /// The loop stops when `cancel` (or the handle's own token, a child of it)
    /// is cancelled.
    pub fn start(self, cancel: CancellationToken) -> SchedulerHandle {
        let cancel = cancel.child_token();
        let state = self.state.subscribe();
        let stats = self.stats.clone();
        let name = self.name.clone();
        let span = info_span!("scheduler_loop", scheduler = %name);
        let join = tokio::spawn(self.drive(cancel.clone()).instrument(span));

        SchedulerHandle {
            name,
            cancel,
            state,
            stats,
            join,
        }
    }

    /// Run the loop on the current task until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> LoopStats {
        let span = info_span!("scheduler_loop", scheduler = %self.name);
        self.drive(cancel).instrument(span).await
    }

    async fn drive(self, cancel: CancellationToken) -> LoopStats {
        let SchedulerLoop {
            name,
            tick,
            sink,
            tasks,
            state,
            stats,
        } = self;

        let anchored_at = Instant::now();
        let mut composer = CadenceComposer::new(tasks, anchored_at);
        let mut ticker = Ticker::starting_at(anchored_at, tick);
        let iterator = TenantIterator::new();

        state.send_replace(SchedulerState::Running);
        info!(
            scheduler = %name,
            tasks = composer.len(),
            tick_secs = tick.as_secs(),
            "scheduler loop started"
        );

        loop {
            let now = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fired = ticker.tick() => match fired {
                    Some(now) => now,
                    None => break,
                },
            };
            stats.lock().unwrap_or_else(PoisonError::into_inner).ticks += 1;

            for index in composer.due(now) {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(definition) = composer.definition(index).cloned() else {
                    continue;
                };
                composer.mark_dispatched(index, now);

                let cycle_id = CycleId::new();
                debug!(scheduler = %name, task = %definition.name(), cycle = %cycle_id, "cycle dispatched");
                let cycle = iterator
                    .run(&definition, cycle_id, &cancel)
                    .instrument(info_span!("cycle", task = %definition.name(), cycle = %cycle_id));
                tokio::pin!(cycle);
                // Stopping is published as soon as cancel fires; the cycle then drains.
                let report = tokio::select! {
                    biased;
                    report = &mut cycle => report,
                    _ = cancel.cancelled() => {
                        mark_stopping(&state, &name);
                        cycle.await
                    }
                };

                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&report);
                emit(sink.as_ref(), &report);
            }
        }

        mark_stopping(&state, &name);
        ticker.stop();

        let totals = snapshot(&stats);
        state.send_replace(SchedulerState::Stopped);
        info!(
            scheduler = %name,
            ticks = totals.ticks,
            cycles = totals.cycles,
            tenants_failed = totals.tenants_failed,
            "scheduler loop stopped"
        );
        totals
    }
}

/// Move a running loop to `Stopping`. No-op once it is already stopping.
fn mark_stopping(state: &watch::Sender<SchedulerState>, name: &str) {
    let changed = state.send_if_modified(|s| {
        if *s < SchedulerState::Stopping {
            *s = SchedulerState::Stopping;
            true
        } else {
            false
        }
    });
    if changed {
        info!(scheduler = %name, "scheduler loop stopping");
    }
}

/// Hand a report to the sink. A panicking sink is logged and otherwise ignored.
fn emit(sink: &dyn ReportSink, report: &CycleReport) {
    let emitted = std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(report)));
    if emitted.is_err() {
        warn!(task = %report.task_name, cycle = %report.cycle_id, "report sink panicked");
    }
}

impl core::fmt::Debug for SchedulerLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerLoop")
            .field("name", &self.name)
            .field("tick", &self.tick)
            .field("tasks", &self.task_names())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Handle to a started loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<SchedulerState>,
    stats: SharedStats,
    join: JoinHandle<LoopStats>,
}

impl SchedulerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a stop: no new cycles or tenant invocations start.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> LoopStats {
        snapshot(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until the loop reaches `target` (or any later state).
    pub async fn wait_for(&self, target: SchedulerState) -> SchedulerState {
        let mut rx = self.state.clone();
        // Errs only once the loop is gone; its last state is still readable.
        let _ = rx.wait_for(|s| *s >= target).await;
        let state = *rx.borrow();
        state
    }

    /// Wait for the loop to finish; in-flight tenant invocations complete first.
    pub async fn join(self) -> LoopStats {
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(scheduler = %self.name, error = %e, "scheduler loop ended abnormally");
                snapshot(&self.stats)
            }
        }
    }

    /// Cancel and wait for the loop to drain.
    pub async fn shutdown(self) -> LoopStats {
        self.cancel();
        self.join().await
    }
}
