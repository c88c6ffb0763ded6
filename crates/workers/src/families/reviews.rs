//! Reviews: scheduled review request emails and queued review imports.
//!
//! Two independent loops, so a slow import never delays email dispatch.

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

pub const EMAIL_LOOP_NAME: &str = "review_email";
pub const IMPORT_LOOP_NAME: &str = "review_import";

pub(crate) const EMAIL_DISPATCH: Cadence = Cadence {
    name: "reviews.email_dispatch",
    interval: Duration::from_secs(15 * 60),
    startup_grace: MINUTE,
};

pub(crate) const IMPORT: Cadence = Cadence {
    name: "reviews.import",
    interval: Duration::from_secs(5 * 60),
    startup_grace: MINUTE,
};

#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Send review request emails scheduled at or before now; returns emails sent.
    async fn send_due_emails(&self, shop: &TenantId) -> anyhow::Result<u64>;

    /// Run the shop's pending import jobs; returns jobs completed.
    async fn run_queued_imports(&self, shop: &TenantId) -> anyhow::Result<u64>;
}

pub struct EmailDispatchUnit {
    service: Arc<dyn ReviewService>,
}

impl EmailDispatchUnit {
    pub fn new(service: Arc<dyn ReviewService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for EmailDispatchUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let sent = self.service.send_due_emails(shop).await?;
        if sent > 0 {
            info!(shop = %shop, count = sent, "sent review request emails");
        }
        Ok(())
    }
}

pub struct ImportUnit {
    service: Arc<dyn ReviewService>,
}

impl ImportUnit {
    pub fn new(service: Arc<dyn ReviewService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskUnit for ImportUnit {
    async fn execute(&self, shop: &TenantId, _cancel: &CancellationToken) -> Result<(), TaskError> {
        let jobs = self.service.run_queued_imports(shop).await?;
        if jobs > 0 {
            info!(shop = %shop, count = jobs, "completed review import jobs");
        }
        Ok(())
    }
}

pub fn email_scheduler(
    settings: &FamilySettings,
    due_review_emails: Arc<dyn TenantDirectory>,
    service: Arc<dyn ReviewService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(EMAIL_LOOP_NAME, &settings.schedule, None, sink)
        .task(EMAIL_DISPATCH, due_review_emails, EmailDispatchUnit::new(service))?
        .build()
}

pub fn import_scheduler(
    settings: &FamilySettings,
    queued_review_imports: Arc<dyn TenantDirectory>,
    service: Arc<dyn ReviewService>,
    sink: Arc<dyn ReportSink>,
) -> Result<SchedulerLoop, ConfigurationError> {
    FamilyBuilder::new(IMPORT_LOOP_NAME, &settings.schedule, None, sink)
        .task(IMPORT, queued_review_imports, ImportUnit::new(service))?
        .build()
}
