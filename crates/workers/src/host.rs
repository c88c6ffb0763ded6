//! Worker host: builds the six task family loops and runs them under one
//! cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use shopworks_infra::PostgresTenantDirectory;
use shopworks_scheduler::{
    ConfigurationError, HostShutdown, LoopStats, ReportSink, SchedulerHost, SchedulerLoop,
    SchedulerState, TenantDirectory, TracingReportSink,
};

use crate::config::WorkersConfig;
use crate::families::affinity::{self, AffinityService};
use crate::families::analytics::{self, AnalyticsService};
use crate::families::inventory::{self, InventoryService};
use crate::families::marketing::{self, MarketingService};
use crate::families::reviews::{self, ReviewService};

/// Tenant sets used by the task families.
#[derive(Clone)]
pub struct Directories {
    pub shops_with_credentials: Arc<dyn TenantDirectory>,
    pub active_shops: Arc<dyn TenantDirectory>,
    pub due_automation_steps: Arc<dyn TenantDirectory>,
    pub active_winback_rules: Arc<dyn TenantDirectory>,
    pub running_experiments: Arc<dyn TenantDirectory>,
    pub due_review_emails: Arc<dyn TenantDirectory>,
    pub queued_review_imports: Arc<dyn TenantDirectory>,
}

impl Directories {
    /// Eligibility queries against the shop database.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            shops_with_credentials: Arc::new(PostgresTenantDirectory::shops_with_credentials(pool.clone())),
            active_shops: Arc::new(PostgresTenantDirectory::active_shops(pool.clone())),
            due_automation_steps: Arc::new(PostgresTenantDirectory::shops_with_due_automation_steps(
                pool.clone(),
            )),
            active_winback_rules: Arc::new(PostgresTenantDirectory::shops_with_active_winback_rules(
                pool.clone(),
            )),
            running_experiments: Arc::new(PostgresTenantDirectory::shops_with_running_experiments(
                pool.clone(),
            )),
            due_review_emails: Arc::new(PostgresTenantDirectory::shops_with_due_review_emails(
                pool.clone(),
            )),
            queued_review_imports: Arc::new(PostgresTenantDirectory::shops_with_queued_review_imports(
                pool,
            )),
        }
    }

    /// Every family sees the same tenant set (tests, single-shop setups).
    pub fn uniform(directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            shops_with_credentials: directory.clone(),
            active_shops: directory.clone(),
            due_automation_steps: directory.clone(),
            active_winback_rules: directory.clone(),
            running_experiments: directory.clone(),
            due_review_emails: directory.clone(),
            queued_review_imports: directory,
        }
    }
}

/// Everything the task families need from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub directories: Directories,
    pub analytics: Arc<dyn AnalyticsService>,
    pub inventory: Arc<dyn InventoryService>,
    pub marketing: Arc<dyn MarketingService>,
    pub affinity: Arc<dyn AffinityService>,
    pub reviews: Arc<dyn ReviewService>,
    pub sink: Arc<dyn ReportSink>,
}

impl Collaborators {
    pub fn new(
        directories: Directories,
        analytics: Arc<dyn AnalyticsService>,
        inventory: Arc<dyn InventoryService>,
        marketing: Arc<dyn MarketingService>,
        affinity: Arc<dyn AffinityService>,
        reviews: Arc<dyn ReviewService>,
    ) -> Self {
        Self {
            directories,
            analytics,
            inventory,
            marketing,
            affinity,
            reviews,
            sink: Arc::new(TracingReportSink),
        }
    }

    pub fn with_sink(mut self, sink: impl ReportSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }
}

/// Build the loops of every enabled family, in a fixed order.
pub fn build_loops(
    config: &WorkersConfig,
    c: &Collaborators,
) -> Result<Vec<SchedulerLoop>, ConfigurationError> {
    let d = &c.directories;
    let mut loops = Vec::new();

    if config.analytics.enabled {
        loops.push(analytics::scheduler(
            &config.analytics,
            d.shops_with_credentials.clone(),
            c.analytics.clone(),
            c.sink.clone(),
        )?);
    }
    if config.inventory.enabled {
        loops.push(inventory::scheduler(
            &config.inventory,
            d.active_shops.clone(),
            c.inventory.clone(),
            c.sink.clone(),
        )?);
    }
    if config.marketing.enabled {
        loops.push(marketing::scheduler(
            &config.marketing,
            d.due_automation_steps.clone(),
            d.active_winback_rules.clone(),
            c.marketing.clone(),
            c.sink.clone(),
        )?);
    }
    if config.affinity.family.enabled {
        loops.push(affinity::scheduler(
            &config.affinity,
            d.active_shops.clone(),
            d.running_experiments.clone(),
            c.affinity.clone(),
            c.sink.clone(),
        )?);
    }
    if config.review_email.enabled {
        loops.push(reviews::email_scheduler(
            &config.review_email,
            d.due_review_emails.clone(),
            c.reviews.clone(),
            c.sink.clone(),
        )?);
    }
    if config.review_import.enabled {
        loops.push(reviews::import_scheduler(
            &config.review_import,
            d.queued_review_imports.clone(),
            c.reviews.clone(),
            c.sink.clone(),
        )?);
    }

    Ok(loops)
}

/// The running worker process.
#[derive(Debug)]
pub struct WorkerHost {
    host: SchedulerHost,
    shutdown_timeout: Duration,
}

impl WorkerHost {
    /// Build every enabled loop, then start them all. Nothing starts if any
    /// loop is misconfigured.
    pub fn start(config: &WorkersConfig, collaborators: Collaborators) -> Result<Self, ConfigurationError> {
        let loops = build_loops(config, &collaborators)?;

        let mut host = SchedulerHost::new();
        for scheduler in loops {
            host.spawn(scheduler);
        }
        info!(loops = host.len(), "worker host started");

        Ok(Self {
            host,
            shutdown_timeout: config.host.shutdown_timeout(),
        })
    }

    pub fn states(&self) -> Vec<(String, SchedulerState)> {
        self.host.states()
    }

    pub fn stats(&self) -> Vec<(String, LoopStats)> {
        self.host.stats()
    }

    /// Cancel all loops and drain them within the configured timeout.
    pub async fn shutdown(self) -> HostShutdown {
        self.host.shutdown(self.shutdown_timeout).await
    }

    /// Initialize logging, start, wait for Ctrl+C / SIGTERM, then drain.
    pub async fn run_until_signal(
        config: WorkersConfig,
        collaborators: Collaborators,
    ) -> anyhow::Result<HostShutdown> {
        shopworks_observability::init_with(&config.logging)?;

        let host = Self::start(&config, collaborators).context("invalid worker configuration")?;
        SchedulerHost::wait_for_signal()
            .await
            .context("failed to listen for shutdown signals")?;

        let summary = host.shutdown().await;
        if !summary.is_clean() {
            anyhow::bail!(
                "loops did not stop within the shutdown timeout: {}",
                summary.timed_out.join(", ")
            );
        }
        Ok(summary)
    }
}
