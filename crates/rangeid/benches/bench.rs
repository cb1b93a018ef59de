use core::hint::black_box;
use criterion::{Criterion, SamplingMode, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use rangeid::{
    AppId, Error, MemoryStore, ObjectIdService, ObjectType, Range, TimeSource, UpdatePolicy,
    engine::AllocationRequest,
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Identifiers allocated per benchmark iteration.
const TOTAL_IDS: usize = 1024;

type Service = ObjectIdService<MemoryStore, FixedMockTime>;

async fn fresh_service(app: &AppId, width: u64) -> Service {
    let service = ObjectIdService::with_clock(MemoryStore::new(), FixedMockTime { millis: 1 })
        .with_policy(UpdatePolicy {
            max_attempts: 10_000,
            ..UpdatePolicy::default()
        });
    service
        .declare_ranges(app, &[Range::new(1, width)], None)
        .await
        .unwrap();
    service
}

/// Allocates one identifier at a time from a single task.
fn bench_allocate_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate/sequential");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let app = AppId::new("bench").unwrap();
            let request = AllocationRequest::new(app.clone(), ObjectType::Table);
            let mut elapsed = core::time::Duration::ZERO;

            for _ in 0..iters {
                let service = fresh_service(&app, TOTAL_IDS as u64).await;
                let start = Instant::now();
                for _ in 0..TOTAL_IDS {
                    let allocation = service.allocate(&request).await.unwrap();
                    black_box(allocation);
                }
                elapsed += start.elapsed();
            }

            elapsed
        });
    });

    group.finish();
}

/// Allocates in batches; the free-id scan dominates as consumption grows.
fn bench_allocate_batched(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate/batched");

    for quantity in [16_i64, 128, 1024] {
        let batches = TOTAL_IDS * 8 / quantity as usize;
        group.throughput(Throughput::Elements((TOTAL_IDS * 8) as u64));
        group.bench_function(format!("quantity/{quantity}"), |b| {
            let rt = Builder::new_current_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let app = AppId::new("bench").unwrap();
                let request =
                    AllocationRequest::new(app.clone(), ObjectType::Table).with_quantity(quantity);
                let mut elapsed = core::time::Duration::ZERO;

                for _ in 0..iters {
                    let service = fresh_service(&app, (TOTAL_IDS * 8) as u64).await;
                    let start = Instant::now();
                    for _ in 0..batches {
                        black_box(service.allocate(&request).await.unwrap());
                    }
                    elapsed += start.elapsed();
                }

                elapsed
            });
        });
    }

    group.finish();
}

/// Many tasks allocating from one record; every commit races the others.
fn bench_allocate_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate/contended");
    group.sample_size(10);
    group.sampling_mode(SamplingMode::Flat);

    for num_tasks in [1, 2, 4, 8, 16] {
        let per_task = TOTAL_IDS / num_tasks;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{TOTAL_IDS}/tasks/{num_tasks}"), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let app = AppId::new("bench").unwrap();
                let mut elapsed = core::time::Duration::ZERO;

                for _ in 0..iters {
                    let service = Arc::new(fresh_service(&app, TOTAL_IDS as u64).await);
                    let start = Instant::now();

                    let tasks = (0..num_tasks).map(|_| {
                        let service = Arc::clone(&service);
                        let request = AllocationRequest::new(app.clone(), ObjectType::Table);
                        tokio::spawn(async move {
                            for _ in 0..per_task {
                                black_box(service.allocate(&request).await?);
                            }
                            Ok::<(), Error>(())
                        })
                    });
                    for result in try_join_all(tasks).await.unwrap() {
                        result.unwrap();
                    }

                    elapsed += start.elapsed();
                }

                elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate_sequential,
    bench_allocate_batched,
    bench_allocate_contended,
);
criterion_main!(benches);
