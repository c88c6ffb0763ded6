//! The task families run by the worker process.
//!
//! Each family is one scheduler loop. Its built-in cadence can be overridden
//! per task from the family's config section.

pub mod affinity;
pub mod analytics;
pub mod inventory;
pub mod marketing;
pub mod reviews;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use shopworks_scheduler::{
    ConfigurationError, LoopSettings, ReportSink, SchedulerLoop, SchedulerLoopBuilder,
    TaskDefinition, TaskSettings, TaskUnit, TenantDirectory,
};

pub(crate) const MINUTE: Duration = Duration::from_secs(60);
pub(crate) const HOUR: Duration = Duration::from_secs(60 * 60);
pub(crate) const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Built-in cadence of one task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cadence {
    pub name: &'static str,
    pub interval: Duration,
    pub startup_grace: Duration,
}

/// Assembles one family's loop from its settings and built-in cadences.
pub(crate) struct FamilyBuilder<'a> {
    settings: &'a LoopSettings,
    known: Vec<&'static str>,
    builder: SchedulerLoopBuilder,
}

impl<'a> FamilyBuilder<'a> {
    pub fn new(
        loop_name: &str,
        settings: &'a LoopSettings,
        default_tick: Option<Duration>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let mut builder = SchedulerLoop::builder(loop_name).sink(sink);
        if let Some(tick) = settings.tick().or(default_tick) {
            builder = builder.tick_every(tick);
        }
        Self {
            settings,
            known: Vec::new(),
            builder,
        }
    }

    pub fn task<U>(
        mut self,
        cadence: Cadence,
        directory: Arc<dyn TenantDirectory>,
        unit: U,
    ) -> Result<Self, ConfigurationError>
    where
        U: TaskUnit + 'static,
    {
        let settings = self.settings.task(cadence.name).cloned().unwrap_or_else(|| {
            TaskSettings::new(cadence.name, cadence.interval).with_startup_grace(cadence.startup_grace)
        });
        self.known.push(cadence.name);
        self.builder = self
            .builder
            .register(TaskDefinition::from_settings(&settings, directory, unit))?;
        Ok(self)
    }

    pub fn build(self) -> Result<SchedulerLoop, ConfigurationError> {
        for task in &self.settings.tasks {
            if !self.known.contains(&task.name.as_str()) {
                warn!(task = %task.name, "ignoring settings for unknown task");
            }
        }
        self.builder.build()
    }
}
