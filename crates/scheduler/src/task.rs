//! Task definitions and the capabilities a task is built from.
//!
//! A task is two injected capabilities plus a cadence:
//! - a [`TenantDirectory`] that lists the eligible tenants, re-evaluated every
//!   time the task becomes due;
//! - a [`TaskUnit`] that performs the work for exactly one tenant.
//!
//! Collaborators are shared by concurrent tenant workers and by independent
//! loops, so implementations must tolerate concurrent calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use shopworks_core::{CycleId, TenantId};

use crate::error::{ConfigurationError, DirectoryError, TaskError};

/// Tenant cap used when a task does not configure one.
pub const DEFAULT_TENANT_CONCURRENCY: usize = 4;

/// Context handed to the tenant directory for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_name: String,
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
}

/// Resolves the set of tenants eligible for a task.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn resolve(&self, ctx: &TaskContext) -> Result<Vec<TenantId>, DirectoryError>;
}

#[async_trait]
impl<D> TenantDirectory for Arc<D>
where
    D: TenantDirectory + ?Sized,
{
    async fn resolve(&self, ctx: &TaskContext) -> Result<Vec<TenantId>, DirectoryError> {
        (**self).resolve(ctx).await
    }
}

/// A tenant-scoped, idempotent unit of work.
///
/// Per-invocation resources (connections, service scopes) should be acquired
/// inside `execute` and released on drop, so every exit path releases them.
/// `cancel` is advisory: long-running units should check it between steps.
#[async_trait]
pub trait TaskUnit: Send + Sync {
    async fn execute(&self, tenant: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError>;
}

#[async_trait]
impl<U> TaskUnit for Arc<U>
where
    U: TaskUnit + ?Sized,
{
    async fn execute(&self, tenant: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError> {
        (**self).execute(tenant, cancel).await
    }
}

/// Task unit backed by an async closure. See [`unit_fn`].
pub struct FnTaskUnit<F> {
    f: F,
}

/// Build a [`TaskUnit`] from `|tenant, cancel| async move { ... }`.
pub fn unit_fn<F, Fut>(f: F) -> FnTaskUnit<F>
where
    F: Fn(TenantId, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    FnTaskUnit { f }
}

#[async_trait]
impl<F, Fut> TaskUnit for FnTaskUnit<F>
where
    F: Fn(TenantId, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn execute(&self, tenant: &TenantId, cancel: &CancellationToken) -> Result<(), TaskError> {
        (self.f)(tenant.clone(), cancel.clone()).await
    }
}

/// Tenant directory backed by an async closure. See [`directory_fn`].
pub struct FnTenantDirectory<F> {
    f: F,
}

/// Build a [`TenantDirectory`] from `|ctx| async move { ... }`.
pub fn directory_fn<F, Fut>(f: F) -> FnTenantDirectory<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<TenantId>, DirectoryError>> + Send,
{
    FnTenantDirectory { f }
}

#[async_trait]
impl<F, Fut> TenantDirectory for FnTenantDirectory<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<TenantId>, DirectoryError>> + Send,
{
    async fn resolve(&self, ctx: &TaskContext) -> Result<Vec<TenantId>, DirectoryError> {
        (self.f)(ctx.clone()).await
    }
}

/// Configuration tuple of one task: `(name, interval, startup grace, concurrency)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskSettings {
    pub name: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub startup_grace_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_TENANT_CONCURRENCY
}

impl TaskSettings {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval_secs: interval.as_secs(),
            startup_grace_secs: 0,
            concurrency: DEFAULT_TENANT_CONCURRENCY,
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace_secs = grace.as_secs();
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

/// A named periodic task.
///
/// Immutable once registered in a loop. The task's `LastRunAt` is owned by the
/// loop's cadence composer, not by the definition.
#[derive(Clone)]
pub struct TaskDefinition {
    name: String,
    interval: Duration,
    startup_grace: Duration,
    concurrency: usize,
    directory: Arc<dyn TenantDirectory>,
    unit: Arc<dyn TaskUnit>,
}

impl TaskDefinition {
    pub fn new<D, U>(name: impl Into<String>, interval: Duration, directory: D, unit: U) -> Self
    where
        D: TenantDirectory + 'static,
        U: TaskUnit + 'static,
    {
        Self {
            name: name.into(),
            interval,
            startup_grace: Duration::ZERO,
            concurrency: DEFAULT_TENANT_CONCURRENCY,
            directory: Arc::new(directory),
            unit: Arc::new(unit),
        }
    }

    /// Build a definition from its configuration tuple.
    pub fn from_settings<D, U>(settings: &TaskSettings, directory: D, unit: U) -> Self
    where
        D: TenantDirectory + 'static,
        U: TaskUnit + 'static,
    {
        Self::new(settings.name.clone(), settings.interval(), directory, unit)
            .with_startup_grace(settings.startup_grace())
            .with_concurrency(settings.concurrency)
    }

    /// Delay the first run by `grace` after the loop starts.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Cap on tenants processed in parallel within one cycle.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn startup_grace(&self) -> Duration {
        self.startup_grace
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    pub fn unit(&self) -> &Arc<dyn TaskUnit> {
        &self.unit
    }

    /// Check the registration invariants.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        if self.interval.is_zero() {
            return Err(ConfigurationError::NonPositiveInterval {
                task: self.name.clone(),
                interval: self.interval,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigurationError::ZeroConcurrency {
                task: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl core::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("startup_grace", &self.startup_grace)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_definition(name: &str, interval: Duration) -> TaskDefinition {
        TaskDefinition::new(
            name,
            interval,
            directory_fn(|_ctx| async { Ok(Vec::new()) }),
            unit_fn(|_tenant, _cancel| async { Ok(()) }),
        )
    }

    #[test]
    fn rejects_zero_interval() {
        let def = noop_definition("analytics.snapshot", Duration::ZERO);
        assert_eq!(
            def.validate(),
            Err(ConfigurationError::NonPositiveInterval {
                task: "analytics.snapshot".to_string(),
                interval: Duration::ZERO,
            })
        );
    }

    #[test]
    fn rejects_blank_name_and_zero_concurrency() {
        assert_eq!(
            noop_definition("  ", Duration::from_secs(1)).validate(),
            Err(ConfigurationError::EmptyName)
        );
        assert_eq!(
            noop_definition("t", Duration::from_secs(1))
                .with_concurrency(0)
                .validate(),
            Err(ConfigurationError::ZeroConcurrency {
                task: "t".to_string()
            })
        );
    }

    #[test]
    fn settings_fill_defaults() {
        let settings: TaskSettings =
            serde_json::from_str(r#"{ "name": "inventory.prediction", "interval_secs": 21600 }"#)
                .unwrap();
        assert_eq!(settings.startup_grace(), Duration::ZERO);
        assert_eq!(settings.concurrency, DEFAULT_TENANT_CONCURRENCY);

        let def = TaskDefinition::from_settings(
            &settings.clone().with_startup_grace(Duration::from_secs(60)),
            directory_fn(|_ctx| async { Ok(Vec::new()) }),
            unit_fn(|_tenant, _cancel| async { Ok(()) }),
        );
        assert_eq!(def.name(), "inventory.prediction");
        assert_eq!(def.interval(), Duration::from_secs(6 * 60 * 60));
        assert_eq!(def.startup_grace(), Duration::from_secs(60));
        assert!(def.validate().is_ok());
    }

    #[tokio::test]
    async fn closure_capabilities_are_invoked() {
        let tenant = TenantId::parse("shop-a.example").unwrap();
        let expected = tenant.clone();
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(1),
            directory_fn(move |_ctx| {
                let tenant = expected.clone();
                async move { Ok(vec![tenant]) }
            }),
            unit_fn(|tenant: TenantId, _cancel| async move {
                if tenant.as_str() == "shop-a.example" {
                    Ok(())
                } else {
                    Err(TaskError::failed("unexpected tenant"))
                }
            }),
        );

        let ctx = TaskContext {
            task_name: "t".to_string(),
            cycle_id: CycleId::new(),
            started_at: Utc::now(),
        };
        let tenants = def.directory().resolve(&ctx).await.unwrap();
        assert_eq!(tenants, vec![tenant.clone()]);
        assert!(def
            .unit()
            .execute(&tenant, &CancellationToken::new())
            .await
            .is_ok());
    }
}
