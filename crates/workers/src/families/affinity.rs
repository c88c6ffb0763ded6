//! Product affinity: co-purchase affinities and upsell experiment winners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use shopworks_core::TenantId;
use shopworks_scheduler::{
    CancellationToken, ConfigurationError, ReportSink, SchedulerLoop, TaskError, TaskUnit,
    TenantDirectory,
};

use super::{Cadence, DAY, FamilyBuilder, HOUR};
use crate::config::AffinitySettings;

pub const LOOP_NAME: &str = "affinity";

/// The affinity loop polls more often than its shortest task interval.
pub(crate) const TICK: Duration = Duration::from_secs(10 * 60);

pub(crate) const CALCULATE: Cadence = Cadence {
    name: "affinity.calculate",
    interval: DAY,
    startup_grace: Duration::from_secs(5 * 60),
};

pub(crate) const EXPERIMENTS: Cadence = Cadence {
    name: "affinity.experiments",
    interval: HOUR,
    startup_grace: Duration::from_secs(5 * 60),
};

#[async_trait]
pub trait AffinityService: Send + Sync {
    /// The shop's configured lookback window, if it has one.
    async fn lookback_days(&self, shop: &TenantId) -> anyhow::Result<Option<u32>>;

    /// Returns the number of product pairs calculated.
    async fn calculate_affinities(&self, shop: &TenantId, lookback_days: u32) -> anyhow::Result<u64>;

    /// Pick winners for experiments that reached significance; returns winners selected.
    async fn select_experiment_winners(&self, shop: &TenantId) -> anyhow::Result<u64>;
}

pub struct CalculateUnit {
    service: Arc<dyn AffinityService>,
    default_lookback_days: u32,
}

impl CalculateUnit {
    pub fn new(service: Arc<dyn AffinityService>, default_lookback_days: u32) -> Self {
        Self {
            service,
            default_lookback_days,
        }
    }
}

#[async_trait]
impl TaskUnit for CalculateUnit {
    async fn execute(&self, shop: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError> {
        let lookback_days = self
            .service
            .lookback_days(shop)
            .await?
            .unwrap_or(self.default_lookback_days);

        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let pairs = self.service.calculate_affinities(shop, lookback_days).await?;
        info!(shop = %shop, lookback_days, count = pairs, "calculated product affinities");
        Ok(())
    }
}

pub struct ExperimentsUnit {
    service: Arc<dyn AffinityService>,
}

impl ExperimentsUnit {
    pub fn new(service: Arc<dyn AffinityService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for ExperimentsUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let winners = self.service.select_experiment_winners(shop).await?;
        if winners > 0 {
            info!(shop = %shop, count = winners, "auto-selected experiment winners");
        }
        Ok(())
    }
}

pub fn scheduler(
    settings: &AffinitySettings,
    active_shops: Arc<dyn TenantDirectory>,
    running_experiments: Arc<dyn TenantDirectory>,
    service: Arc<dyn AffinityService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(LOOP_NAME, &settings.family.schedule, Some(TICK), sink)
        .task(
            CALCULATE,
            active_shops,
            CalculateUnit::new(service.clone(), settings.default_lookback_days),
        )?
        .task(EXPERIMENTS, running_experiments, ExperimentsUnit::new(service))?
        .build()
}
