//! Tenant iterator: run one task unit across its resolved tenant set.
//!
//! - Every tenant invocation runs behind an isolation boundary (errors and
//!   panics become `Failed` outcomes; siblings keep running).
//! - Fan-out is bounded by the task's concurrency cap and is local to the call.
//! - Cancellation stops new invocations; in-flight ones finish, the rest are
//!   `Skipped`.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use shopworks_core::{CycleId, TenantId};

use crate::error::TaskError;
use crate::report::{CycleOutcome, CycleReport};
use crate::task::{TaskContext, TaskDefinition, TaskUnit};

/// Runs task units per tenant for one cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct TenantIterator;

impl TenantIterator {
    pub fn new() -> Self {
        Self
    }

    /// Execute `definition` for every eligible tenant and aggregate the outcomes.
    pub async fn run(
        &self,
        definition: &TaskDefinition,
        cycle_id: CycleId,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let started = Instant::now();
        let ctx = TaskContext {
            task_name: definition.name().to_string(),
            cycle_id,
            started_at: Utc::now(),
        };
        let mut report = CycleReport::new(cycle_id, definition.name(), ctx.started_at);

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = definition.directory().resolve(&ctx) => Some(result),
        };

        let tenants = match resolved {
            None => {
                debug!(task = %definition.name(), cycle = %cycle_id, "tenant resolution abandoned: cancelled");
                report.interrupted = true;
                report.duration = started.elapsed();
                return report;
            }
            Some(Err(e)) => {
                warn!(task = %definition.name(), cycle = %cycle_id, error = %e, "failed to resolve tenants");
                report.directory_error = Some(e.to_string());
                report.duration = started.elapsed();
                return report;
            }
            Some(Ok(tenants)) => dedupe(tenants),
        };

        debug!(
            task = %definition.name(),
            cycle = %cycle_id,
            tenants = tenants.len(),
            concurrency = definition.concurrency(),
            "resolved tenants"
        );

        report.outcomes = fan_out(definition, cycle_id, tenants, cancel).await;
        report.interrupted = cancel.is_cancelled();
        report.duration = started.elapsed();
        report
    }
}

/// Keep the first occurrence of every tenant.
fn dedupe(tenants: Vec<TenantId>) -> Vec<TenantId> {
    let mut seen = HashSet::with_capacity(tenants.len());
    tenants
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

async fn fan_out(
    definition: &TaskDefinition,
    cycle_id: CycleId,
    tenants: Vec<TenantId>,
    cancel: &CancellationToken,
) -> Vec<CycleOutcome> {
    let task_name: Arc<str> = Arc::from(definition.name());
    let cap = definition.concurrency().max(1);
    let mut outcomes = Vec::with_capacity(tenants.len());
    let mut pending = tenants.into_iter();
    let mut in_flight = JoinSet::new();
    let mut spawned: HashMap<Id, TenantId> = HashMap::with_capacity(cap);

    loop {
        // Fill free slots unless cancellation was requested.
        while in_flight.len() < cap && !cancel.is_cancelled() {
            let Some(tenant) = pending.next() else { break };
            let span = info_span!("tenant_task", task = %task_name, tenant = %tenant, cycle = %cycle_id);
            let handle = in_flight.spawn(
                invoke(
                    definition.unit().clone(),
                    task_name.clone(),
                    tenant.clone(),
                    cancel.clone(),
                )
                .instrument(span),
            );
            spawned.insert(handle.id(), tenant);
        }

        let Some(joined) = in_flight.join_next_with_id().await else {
            break;
        };
        if let Some(outcome) = settle(joined, &mut spawned, &task_name, cycle_id) {
            outcomes.push(outcome);
        }
    }

    outcomes.extend(pending.map(|tenant| CycleOutcome::skipped(tenant, &*task_name)));
    outcomes
}

/// Turn one joined worker into its tenant's outcome.
///
/// Panics are caught inside `invoke`, so a `JoinError` means the worker was
/// aborted (runtime shutdown); its tenant is still accounted for as `Failed`.
fn settle(
    joined: Result<(Id, CycleOutcome), JoinError>,
    spawned: &mut HashMap<Id, TenantId>,
    task_name: &str,
    cycle_id: CycleId,
) -> Option<CycleOutcome> {
    match joined {
        Ok((id, outcome)) => {
            spawned.remove(&id);
            Some(outcome)
        }
        Err(e) => {
            let tenant = spawned.remove(&e.id())?;
            warn!(task = %task_name, cycle = %cycle_id, tenant = %tenant, error = %e, "tenant worker aborted");
            Some(CycleOutcome::failed(
                tenant,
                task_name,
                format!("aborted: {e}"),
                Duration::ZERO,
            ))
        }
    }
}

async fn invoke(
    unit: Arc<dyn TaskUnit>,
    task_name: Arc<str>,
    tenant: TenantId,
    cancel: CancellationToken,
) -> CycleOutcome {
    let started = Instant::now();
    let result = AssertUnwindSafe(unit.execute(&tenant, &cancel))
        .catch_unwind()
        .await;
    let elapsed: Duration = started.elapsed();

    match result {
        Ok(Ok(())) => {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "tenant task succeeded");
            CycleOutcome::succeeded(tenant, &*task_name, elapsed)
        }
        Ok(Err(TaskError::Cancelled)) => {
            debug!("tenant task stopped on cancellation");
            CycleOutcome::skipped(tenant, &*task_name)
        }
        Ok(Err(e)) => {
            let detail = format!("{:#}", e);
            warn!(error = %detail, "tenant task failed");
            CycleOutcome::failed(tenant, &*task_name, detail, elapsed)
        }
        Err(panic) => {
            let detail = format!("panicked: {}", panic_message(&*panic));
            warn!(error = %detail, "tenant task panicked");
            CycleOutcome::failed(tenant, &*task_name, detail, elapsed)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::DirectoryError;
    use crate::report::OutcomeStatus;
    use crate::task::{directory_fn, unit_fn};
    use proptest::prelude::*;

    fn tenants(names: &[&str]) -> Vec<TenantId> {
        names.iter().map(|n| TenantId::parse(n).unwrap()).collect()
    }

    fn fixed_directory(
        list: Vec<TenantId>,
    ) -> impl crate::task::TenantDirectory + 'static {
        directory_fn(move |_ctx| {
            let list = list.clone();
            async move { Ok(list) }
        })
    }

    #[tokio::test]
    async fn one_failing_tenant_does_not_affect_siblings() {
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(tenants(&["t1", "t2", "t3"])),
            unit_fn(|tenant: TenantId, _cancel| async move {
                if tenant.as_str() == "t2" {
                    Err(TaskError::failed("boom"))
                } else {
                    Ok(())
                }
            }),
        );

        let report = TenantIterator::new()
            .run(&def, CycleId::new(), &CancellationToken::new())
            .await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);
        let t2 = report.outcome_for(&TenantId::parse("t2").unwrap()).unwrap();
        assert_eq!(t2.status, OutcomeStatus::Failed);
        assert_eq!(t2.error.as_deref(), Some("boom"));
        assert!(!report.interrupted);
    }

    #[tokio::test]
    async fn panics_are_contained_as_failures() {
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(tenants(&["ok", "bad"])),
            unit_fn(|tenant: TenantId, _cancel| async move {
                if tenant.as_str() == "bad" {
                    panic!("unexpected fault");
                }
                Ok(())
            }),
        );

        let report = TenantIterator::new()
            .run(&def, CycleId::new(), &CancellationToken::new())
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        let bad = report.outcome_for(&TenantId::parse("bad").unwrap()).unwrap();
        assert_eq!(bad.error.as_deref(), Some("panicked: unexpected fault"));
    }

    #[tokio::test]
    async fn directory_failure_is_one_task_level_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            directory_fn(|_ctx| async { Err(DirectoryError::transient("db timeout")) }),
            unit_fn(move |_tenant, _cancel| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );

        let report = TenantIterator::new()
            .run(&def, CycleId::new(), &CancellationToken::new())
            .await;

        assert!(report.is_task_failure());
        assert_eq!(report.tenant_count(), 0);
        assert!(report.directory_error.as_deref().unwrap().contains("db timeout"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_tenants_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(tenants(&["a", "b", "a"])),
            unit_fn(move |_tenant, _cancel| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );

        let report = TenantIterator::new()
            .run(&def, CycleId::new(), &CancellationToken::new())
            .await;

        assert_eq!(report.tenant_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_the_cap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        let names: Vec<String> = (0..20).map(|i| format!("shop-{i}")).collect();
        let list = names.iter().map(|n| TenantId::parse(n).unwrap()).collect();
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(list),
            unit_fn(move |_tenant, _cancel| {
                let (r, p) = (r.clone(), p.clone());
                async move {
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .with_concurrency(3);

        let report = TenantIterator::new()
            .run(&def, CycleId::new(), &CancellationToken::new())
            .await;

        assert_eq!(report.succeeded(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_cycle_skips_unstarted_tenants() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();

        // Concurrency 1: tenants run strictly one after another. The second
        // tenant requests cancellation while it runs.
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(tenants(&["t1", "t2", "t3", "t4", "t5"])),
            unit_fn(move |_tenant, _cancel| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let trigger = trigger.clone();
                async move {
                    if n == 2 {
                        trigger.cancel();
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            }),
        )
        .with_concurrency(1);

        let report = TenantIterator::new().run(&def, CycleId::new(), &cancel).await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(report.succeeded() + report.failed(), 2);
        assert_eq!(report.skipped(), 3);
        assert_eq!(report.tenant_count(), 5);
        assert!(report.interrupted);
    }

    #[tokio::test]
    async fn cancellation_aware_units_are_recorded_as_skipped() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let def = TaskDefinition::new(
            "t",
            Duration::from_secs(60),
            fixed_directory(tenants(&["t1"])),
            unit_fn(|_tenant, cancel: CancellationToken| async move {
                if cancel.is_cancelled() {
                    return Err(TaskError::Cancelled);
                }
                Ok(())
            }),
        );

        // Already cancelled: directory resolution is abandoned.
        let report = TenantIterator::new().run(&def, CycleId::new(), &cancel).await;
        assert!(report.interrupted);
        assert_eq!(report.tenant_count(), 0);

        // A unit that observes cancellation itself reports Skipped, not Failed.
        let outcome = invoke(
            def.unit().clone(),
            Arc::from("t"),
            TenantId::parse("t1").unwrap(),
            cancel,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.error, None);
    }

    #[tokio::test]
    async fn aborted_worker_is_still_accounted_as_failed() {
        let mut workers = JoinSet::new();
        let handle = workers.spawn(std::future::pending::<CycleOutcome>());
        let tenant = TenantId::parse("shop-a").unwrap();
        let mut spawned = HashMap::from([(handle.id(), tenant.clone())]);
        handle.abort();

        let joined = workers.join_next_with_id().await.unwrap();
        let outcome = settle(joined, &mut spawned, "t", CycleId::new()).unwrap();

        assert_eq!(outcome.tenant_id, tenant);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().starts_with("aborted"));
        assert!(spawned.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        /// With N tenants of which K fail, the report has exactly K failures
        /// and N-K successes, for any failure placement and concurrency cap.
        #[test]
        fn failure_counts_are_exact(
            failing in proptest::collection::vec(any::<bool>(), 0..40),
            cap in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_time()
                .build()
                .unwrap();

            let list: Vec<TenantId> = (0..failing.len())
                .map(|i| TenantId::parse(format!("shop-{i}")).unwrap())
                .collect();
            let failing_set: HashSet<TenantId> = list
                .iter()
                .zip(failing.iter())
                .filter(|(_, f)| **f)
                .map(|(t, _)| t.clone())
                .collect();
            let k = failing_set.len();
            let n = list.len();
            let failing_set = Arc::new(failing_set);

            let def = TaskDefinition::new(
                "t",
                Duration::from_secs(60),
                fixed_directory(list),
                unit_fn(move |tenant: TenantId, _cancel| {
                    let fails = failing_set.contains(&tenant);
                    async move {
                        tokio::task::yield_now().await;
                        if fails { Err(TaskError::failed("x")) } else { Ok(()) }
                    }
                }),
            )
            .with_concurrency(cap);

            let report = rt.block_on(TenantIterator::new().run(
                &def,
                CycleId::new(),
                &CancellationToken::new(),
            ));

            prop_assert_eq!(report.failed(), k);
            prop_assert_eq!(report.succeeded(), n - k);
            prop_assert_eq!(report.skipped(), 0);
        }
    }
}
