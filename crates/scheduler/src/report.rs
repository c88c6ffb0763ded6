//! Per-cycle outcomes and their aggregation.
//!
//! Reports are ephemeral: produced once per task per cycle, handed to the
//! reporting sink, and never persisted by the scheduler itself.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use shopworks_core::{CycleId, TenantId};

/// Status of one tenant within one cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of running one task unit for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub tenant_id: TenantId,
    pub task_name: String,
    pub status: OutcomeStatus,
    /// Present iff `status == Failed`.
    pub error: Option<String>,
    pub duration: Duration,
}

impl CycleOutcome {
    pub fn succeeded(tenant_id: TenantId, task_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            tenant_id,
            task_name: task_name.into(),
            status: OutcomeStatus::Succeeded,
            error: None,
            duration,
        }
    }

    pub fn failed(
        tenant_id: TenantId,
        task_name: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            tenant_id,
            task_name: task_name.into(),
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn skipped(tenant_id: TenantId, task_name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            task_name: task_name.into(),
            status: OutcomeStatus::Skipped,
            error: None,
            duration: Duration::ZERO,
        }
    }
}

/// Aggregated outcomes of one task for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcomes: Vec<CycleOutcome>,
    /// Set when the tenant directory failed; the whole cycle is one task-level failure.
    pub directory_error: Option<String>,
    /// Set when cancellation cut the cycle short.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn new(cycle_id: CycleId, task_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            task_name: task_name.into(),
            started_at,
            duration: Duration::ZERO,
            outcomes: Vec::new(),
            directory_error: None,
            interrupted: false,
        }
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    pub fn tenant_count(&self) -> usize {
        self.outcomes.len()
    }

    /// True when the cycle failed as a whole (tenant resolution failed).
    pub fn is_task_failure(&self) -> bool {
        self.directory_error.is_some()
    }

    pub fn failed_tenants(&self) -> impl Iterator<Item = &TenantId> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .map(|o| &o.tenant_id)
    }

    pub fn outcome_for(&self, tenant_id: &TenantId) -> Option<&CycleOutcome> {
        self.outcomes.iter().find(|o| &o.tenant_id == tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    #[test]
    fn counts_by_status() {
        let mut report = CycleReport::new(CycleId::new(), "t", Utc::now());
        report
            .outcomes
            .push(CycleOutcome::succeeded(tenant("a"), "t", Duration::from_millis(5)));
        report
            .outcomes
            .push(CycleOutcome::failed(tenant("b"), "t", "boom", Duration::from_millis(1)));
        report.outcomes.push(CycleOutcome::skipped(tenant("c"), "t"));

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.tenant_count(), 3);
        assert!(!report.is_task_failure());
        assert_eq!(report.failed_tenants().collect::<Vec<_>>(), vec![&tenant("b")]);
        assert_eq!(
            report.outcome_for(&tenant("b")).and_then(|o| o.error.as_deref()),
            Some("boom")
        );
    }

    #[test]
    fn serializes_statuses_in_snake_case() {
        let outcome = CycleOutcome::skipped(tenant("a"), "t");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["tenant_id"], "a");
    }
}
