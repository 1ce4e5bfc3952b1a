use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use backflow::mediator::Mediator;
use backflow::prelude::*;

fn bench_offer(c: &mut Criterion) {
    let mut group = c.benchmark_group("offer");

    for size in [1_000u64, 100_000].iter() {
        group.throughput(Throughput::Elements(*size));

        for policy in BackpressurePolicy::ALL {
            group.bench_with_input(BenchmarkId::new(policy.as_str(), size), size, |b, &size| {
                b.iter(|| {
                    let mediator = Mediator::new(policy);
                    for i in 0..size {
                        black_box(mediator.offer(i));
                    }
                    mediator.signal_complete();
                    black_box(mediator.pending())
                });
            });
        }
    }

    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [1_000u64, 100_000].iter() {
        group.throughput(Throughput::Elements(*size));

        for policy in BackpressurePolicy::ALL {
            group.bench_with_input(BenchmarkId::new(policy.as_str(), size), size, |b, &size| {
                b.iter(|| {
                    runtime.block_on(async {
                        let pipeline = Pipeline::new();
                        let consumer = consumer_from_fn(|item: u64| {
                            black_box(item);
                            Ok(())
                        });
                        let run = pipeline.start(size, policy, consumer).unwrap();
                        black_box(run.wait().await)
                    })
                });
            });
        }
    }

    group.finish();
}

fn bench_demand_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("demand_batch_size");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for batch_size in [1, 64, 1024, 16_384].iter() {
        group.bench_with_input(
            BenchmarkId::new("buffer", batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    runtime.block_on(async {
                        let pipeline = Pipeline::new().demand_batch_size(batch_size);
                        let consumer = consumer_from_fn(|item: u64| {
                            black_box(item);
                            Ok(())
                        });
                        let run = pipeline
                            .start(50_000, BackpressurePolicy::Buffer, consumer)
                            .unwrap();
                        black_box(run.wait().await)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_offer, bench_full_run, bench_demand_batch_size);
criterion_main!(benches);
