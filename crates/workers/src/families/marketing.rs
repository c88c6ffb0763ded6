//! Marketing automation: enrollment steps and win-back campaigns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use shopworks_core::TenantId;
use shopworks_scheduler::{
    CancellationToken, ConfigurationError, ReportSink, SchedulerLoop, TaskError, TaskUnit,
    TenantDirectory,
};

use super::{Cadence, DAY, FamilyBuilder, MINUTE};
use crate::config::FamilySettings;

pub const LOOP_NAME: &str = "marketing";

pub(crate) const AUTOMATION_STEPS: Cadence = Cadence {
    name: "marketing.automation_steps",
    interval: MINUTE,
    startup_grace: Duration::ZERO,
};

pub(crate) const WINBACK: Cadence = Cadence {
    name: "marketing.winback",
    interval: DAY,
    startup_grace: Duration::ZERO,
};

#[async_trait]
pub trait MarketingService: Send + Sync {
    /// Advance enrollments whose next step is due; returns steps processed.
    async fn process_pending_steps(&self, shop: &TenantId) -> anyhow::Result<u64>;

    /// Enroll lapsed customers into win-back campaigns; returns enrollments made.
    async fn process_winback_triggers(&self, shop: &TenantId) -> anyhow::Result<u64>;
}

pub struct AutomationStepsUnit {
    service: Arc<dyn MarketingService>,
}

impl AutomationStepsUnit {
    pub fn new(service: Arc<dyn MarketingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for AutomationStepsUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let processed = self.service.process_pending_steps(shop).await?;
        // Runs every minute: stay quiet when there was nothing to do.
        if processed > 0 {
            info!(shop = %shop, count = processed, "processed automation steps");
        }
        Ok(())
    }
}

pub struct WinbackUnit {
    service: Arc<dyn MarketingService>,
}

impl WinbackUnit {
    pub fn new(service: Arc<dyn MarketingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for WinbackUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let triggered = self.service.process_winback_triggers(shop).await?;
        if triggered > 0 {
            info!(shop = %shop, count = triggered, "triggered win-back enrollments");
        }
        Ok(())
    }
}

pub fn scheduler(
    settings: &FamilySettings,
    due_automation_steps: Arc<dyn TenantDirectory>,
    active_winback_rules: Arc<dyn TenantDirectory>,
    service: Arc<dyn MarketingService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(LOOP_NAME, &settings.schedule, None, sink)
        .task(AUTOMATION_STEPS, due_automation_steps, AutomationStepsUnit::new(service.clone()))?
        .task(WINBACK, active_winback_rules, WinbackUnit::new(service))?
        .build()
}
