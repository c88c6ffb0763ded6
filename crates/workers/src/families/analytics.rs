//! Analytics: daily snapshots and customer lifetime value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use shopworks_core::TenantId;
use shopworks_scheduler::{
    CancellationToken, ConfigurationError, ReportSink, SchedulerLoop, TaskError, TaskUnit,
    TenantDirectory,
};

use super::{Cadence, DAY, FamilyBuilder};
use crate::config::FamilySettings;

pub const LOOP_NAME: &str = "analytics";

pub(crate) const SNAPSHOT: Cadence = Cadence {
    name: "analytics.snapshot",
    interval: Duration::from_secs(6 * 60 * 60),
    startup_grace: Duration::ZERO,
};

pub(crate) const CLV: Cadence = Cadence {
    name: "analytics.clv",
    interval: DAY,
    startup_grace: Duration::ZERO,
};

/// Shop analytics operations.
#[async_trait]
pub trait AnalyticsService: Send + Sync {
    async fn daily_snapshot_exists(&self, shop: &TenantId, date: NaiveDate) -> anyhow::Result<bool>;

    async fn generate_daily_snapshot(&self, shop: &TenantId, date: NaiveDate) -> anyhow::Result<()>;

    /// Recalculate CLV for every customer of `shop`; returns the customers updated.
    async fn recalculate_clv(&self, shop: &TenantId) -> anyhow::Result<u64>;
}

/// Generates yesterday's daily snapshot unless it already exists.
pub struct SnapshotUnit {
    service: Arc<dyn AnalyticsService>,
}

impl SnapshotUnit {
    pub fn new(service: Arc<dyn AnalyticsService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for SnapshotUnit {
    async fn execute(&self, shop: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError> {
        let yesterday = Utc::now()
            .date_naive()
            .pred_opt()
            .ok_or_else(|| TaskError::failed("current date has no predecessor"))?;

        if self.service.daily_snapshot_exists(shop, yesterday).await? {
            debug!(shop = %shop, date = %yesterday, "daily snapshot already exists");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        info!(shop = %shop, date = %yesterday, "generating daily snapshot");
        self.service.generate_daily_snapshot(shop, yesterday).await?;
        Ok(())
    }
}

pub struct ClvUnit {
    service: Arc<dyn AnalyticsService>,
}

impl ClvUnit {
    pub fn new(service: Arc<dyn AnalyticsService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for ClvUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let updated = self.service.recalculate_clv(shop).await?;
        info!(shop = %shop, customers = updated, "recalculated customer lifetime value");
        Ok(())
    }
}

/// Both analytics tasks run over shops holding valid credentials.
pub fn scheduler(
    settings: &FamilySettings,
    shops_with_credentials: Arc<dyn TenantDirectory>,
    service: Arc<dyn AnalyticsService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(LOOP_NAME, &settings.schedule, None, sink)
        .task(SNAPSHOT, shops_with_credentials.clone(), SnapshotUnit::new(service.clone()))?
        .task(CLV, shops_with_credentials, ClvUnit::new(service))?
        .build()
}
