//! Inventory: stock-out predictions, alerts and alert notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use shopworks_core::TenantId;
use shopworks_scheduler::{
    CancellationToken, ConfigurationError, ReportSink, SchedulerLoop, TaskError, TaskUnit,
    TenantDirectory,
};

use super::{Cadence, FamilyBuilder, MINUTE};
use crate::config::FamilySettings;

pub const LOOP_NAME: &str = "inventory";

pub(crate) const PREDICTION: Cadence = Cadence {
    name: "inventory.prediction",
    interval: Duration::from_secs(6 * 60 * 60),
    startup_grace: MINUTE,
};

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Returns the number of predictions updated.
    async fn calculate_predictions(&self, shop: &TenantId) -> anyhow::Result<u64>;

    /// Returns the number of alerts raised.
    async fn generate_alerts(&self, shop: &TenantId) -> anyhow::Result<u64>;

    /// Returns the number of notifications sent.
    async fn send_pending_notifications(&self, shop: &TenantId) -> anyhow::Result<u64>;
}

/// Predictions, then alerts, then notifications. Stops between steps once
/// cancelled; every step is safe to repeat on the next cycle.
pub struct PredictionUnit {
    service: Arc<dyn InventoryService>,
}

impl PredictionUnit {
    pub fn new(service: Arc<dyn InventoryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for PredictionUnit {
    async fn execute(&self, shop: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError> {
        let predictions = self.service.calculate_predictions(shop).await?;
        info!(shop = %shop, count = predictions, "updated inventory predictions");

        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let alerts = self.service.generate_alerts(shop).await?;
        info!(shop = %shop, count = alerts, "generated inventory alerts");

        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let sent = self.service.send_pending_notifications(shop).await?;
        info!(shop = %shop, count = sent, "sent inventory notifications");
        Ok(())
    }
}

pub fn scheduler(
    settings: &FamilySettings,
    active_shops: Arc<dyn TenantDirectory>,
    service: Arc<dyn InventoryService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(LOOP_NAME, &settings.schedule, None, sink)
        .task(PREDICTION, active_shops, PredictionUnit::new(service))?
        .build()
}
