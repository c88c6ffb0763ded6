use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use shopworks_core::TenantId;
use shopworks_scheduler::{
    CadenceComposer, CancellationToken, TaskDefinition, TenantIterator, directory_fn, unit_fn,
};
use tokio::time::Instant;

fn definitions(count: usize) -> Vec<Arc<TaskDefinition>> {
    (0..count)
        .map(|i| {
            Arc::new(
                TaskDefinition::new(
                    format!("task-{i}"),
                    Duration::from_secs(60 * (1 + (i as u64 % 30))),
                    directory_fn(|_ctx| async { Ok(Vec::new()) }),
                    unit_fn(|_tenant, _cancel| async { Ok(()) }),
                )
                .with_startup_grace(Duration::from_secs(i as u64 % 5)),
            )
        })
        .collect()
}

fn bench_due_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("cadence_due");

    for count in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let start = Instant::now();
            let mut composer = CadenceComposer::new(definitions(count), start);
            for i in composer.due(start + Duration::from_secs(10)) {
                composer.mark_dispatched(i, start + Duration::from_secs(10));
            }
            let probe = start + Duration::from_secs(15 * 60);

            b.iter(|| black_box(composer.due(black_box(probe))));
        });
    }

    group.finish();
}

fn bench_tenant_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_fan_out");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_time()
        .build()
        .unwrap();

    for tenants in [10usize, 100, 1000] {
        let list: Vec<TenantId> = (0..tenants)
            .map(|i| TenantId::parse(format!("shop-{i}.example")).unwrap())
            .collect();
        let def = TaskDefinition::new(
            "bench",
            Duration::from_secs(60),
            directory_fn(move |_ctx| {
                let list = list.clone();
                async move { Ok(list) }
            }),
            unit_fn(|_tenant, _cancel| async {
                tokio::task::yield_now().await;
                Ok(())
            }),
        );
        let cancel = CancellationToken::new();

        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, _| {
            b.iter(|| {
                rt.block_on(TenantIterator::new().run(&def, Default::default(), &cancel))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_due_resolution, bench_tenant_fan_out);
criterion_main!(benches);
