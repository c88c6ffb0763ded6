//! Postgres-backed tenant directories.
//!
//! Each directory runs one read-only query returning a single text column of
//! shop domains. The query is re-run on every resolution, so eligibility
//! changes (a shop deactivated, a job queued) take effect on the next cycle.
//!
//! ## Error Mapping
//!
//! | SQLx Error | DirectoryError |
//! |------------|----------------|
//! | `Io`, `PoolTimedOut`, `Protocol` | `Transient` |
//! | Database, SQLSTATE class `08` / `40` / `53` / `57` | `Transient` |
//! | Database (other), `PoolClosed`, anything else | `Unavailable` |

use std::borrow::Cow;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use shopworks_core::TenantId;
use shopworks_scheduler::{DirectoryError, TaskContext, TenantDirectory};

const SHOPS_WITH_CREDENTIALS: &str = r#"
    SELECT domain
    FROM shops
    WHERE offline_access_token IS NOT NULL AND offline_access_token <> ''
    ORDER BY domain
"#;

const ACTIVE_SHOPS: &str = r#"
    SELECT domain
    FROM shops
    WHERE is_active
    ORDER BY domain
"#;

const SHOPS_WITH_DUE_AUTOMATION_STEPS: &str = r#"
    SELECT DISTINCT a.shop_domain
    FROM email_automation_enrollments e
    JOIN email_automations a ON a.id = e.automation_id
    WHERE e.status = 'active' AND e.next_step_at <= NOW()
    ORDER BY a.shop_domain
"#;

const SHOPS_WITH_ACTIVE_WINBACK_RULES: &str = r#"
    SELECT DISTINCT shop_domain
    FROM winback_rules
    WHERE is_active
    ORDER BY shop_domain
"#;

const SHOPS_WITH_RUNNING_EXPERIMENTS: &str = r#"
    SELECT DISTINCT shop_domain
    FROM upsell_experiments
    WHERE status = 'running'
    ORDER BY shop_domain
"#;

const SHOPS_WITH_DUE_REVIEW_EMAILS: &str = r#"
    SELECT DISTINCT shop_domain
    FROM review_email_logs
    WHERE status = 'scheduled' AND scheduled_at <= NOW()
    ORDER BY shop_domain
"#;

const SHOPS_WITH_QUEUED_REVIEW_IMPORTS: &str = r#"
    SELECT DISTINCT shop_domain
    FROM review_import_jobs
    WHERE status = 'pending'
    ORDER BY shop_domain
"#;

/// Tenant directory backed by one SQL query.
#[derive(Debug, Clone)]
pub struct PostgresTenantDirectory {
    pool: PgPool,
    name: &'static str,
    query: Cow<'static, str>,
}

impl PostgresTenantDirectory {
    /// `query` must return the tenant identifier as its first (text) column.
    pub fn new(pool: PgPool, name: &'static str, query: impl Into<Cow<'static, str>>) -> Self {
        Self {
            pool,
            name,
            query: query.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Shops holding a usable offline access token.
    pub fn shops_with_credentials(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_credentials", SHOPS_WITH_CREDENTIALS)
    }

    pub fn active_shops(pool: PgPool) -> Self {
        Self::new(pool, "active_shops", ACTIVE_SHOPS)
    }

    /// Shops with at least one active automation enrollment whose next step is due.
    pub fn shops_with_due_automation_steps(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_due_automation_steps", SHOPS_WITH_DUE_AUTOMATION_STEPS)
    }

    pub fn shops_with_active_winback_rules(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_active_winback_rules", SHOPS_WITH_ACTIVE_WINBACK_RULES)
    }

    pub fn shops_with_running_experiments(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_running_experiments", SHOPS_WITH_RUNNING_EXPERIMENTS)
    }

    /// Shops with review request emails scheduled at or before now.
    pub fn shops_with_due_review_emails(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_due_review_emails", SHOPS_WITH_DUE_REVIEW_EMAILS)
    }

    pub fn shops_with_queued_review_imports(pool: PgPool) -> Self {
        Self::new(pool, "shops_with_queued_review_imports", SHOPS_WITH_QUEUED_REVIEW_IMPORTS)
    }
}

#[async_trait]
impl TenantDirectory for PostgresTenantDirectory {
    async fn resolve(&self, ctx: &TaskContext) -> Result<Vec<TenantId>, DirectoryError> {
        let started = Instant::now();
        let rows: Vec<String> = sqlx::query_scalar(self.query.as_ref())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(self.name, e))?;

        let tenants = parse_tenants(self.name, rows);
        debug!(
            directory = self.name,
            task = %ctx.task_name,
            tenants = tenants.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolved tenants"
        );
        Ok(tenants)
    }
}

/// Convert raw rows to tenant ids, dropping blank values.
fn parse_tenants(directory: &str, rows: Vec<String>) -> Vec<TenantId> {
    rows.into_iter()
        .filter_map(|raw| match TenantId::parse(&raw) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(directory, error = %e, "skipping invalid tenant row");
                None
            }
        })
        .collect()
}

fn map_sqlx_error(directory: &str, err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Io(e) => DirectoryError::transient(format!("{}: i/o error: {}", directory, e)),
        sqlx::Error::PoolTimedOut => {
            DirectoryError::transient(format!("{}: timed out acquiring a connection", directory))
        }
        sqlx::Error::Protocol(msg) => {
            DirectoryError::transient(format!("{}: protocol error: {}", directory, msg))
        }
        sqlx::Error::Database(db_err) => {
            let msg = format!("{}: database error: {}", directory, db_err.message());
            let retryable = db_err
                .code()
                .map(|code| {
                    ["08", "40", "53", "57"]
                        .iter()
                        .any(|class| code.starts_with(class))
                })
                .unwrap_or(false);
            if retryable {
                DirectoryError::transient(msg)
            } else {
                DirectoryError::unavailable(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            DirectoryError::unavailable(format!("{}: connection pool closed", directory))
        }
        other => DirectoryError::unavailable(format!("{}: {}", directory, other)),
    }
}
