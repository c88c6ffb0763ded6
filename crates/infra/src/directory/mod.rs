//! Tenant directories: where a task's eligible tenant set comes from.

mod postgres;

pub use postgres::PostgresTenantDirectory;

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use shopworks_core::TenantId;
use shopworks_scheduler::{DirectoryError, TaskContext, TenantDirectory};

/// Fixed, mutable tenant list for tests/dev and single-shop deployments.
///
/// Changes made between cycles are picked up on the next resolution.
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    tenants: RwLock<Vec<TenantId>>,
}

impl StaticTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = TenantId>) -> Self {
        Self {
            tenants: RwLock::new(tenants.into_iter().collect()),
        }
    }

    pub fn set(&self, tenants: impl IntoIterator<Item = TenantId>) {
        let mut guard = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        *guard = tenants.into_iter().collect();
    }

    pub fn add(&self, tenant: TenantId) {
        let mut guard = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.contains(&tenant) {
            guard.push(tenant);
        }
    }

    pub fn remove(&self, tenant: &TenantId) -> bool {
        let mut guard = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|t| t != tenant);
        guard.len() != before
    }

    pub fn list(&self) -> Vec<TenantId> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn resolve(&self, _ctx: &TaskContext) -> Result<Vec<TenantId>, DirectoryError> {
        Ok(self.list())
    }
}
