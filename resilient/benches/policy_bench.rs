//! Benchmarks for strategy chain overhead.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use resilient::prelude::*;
use std::sync::Arc;

fn chain() -> ComposedStrategy {
    compose([
        Arc::new(CircuitBreakerStrategy::new(CircuitBreakerOptions::default())) as Arc<dyn Strategy>,
        Arc::new(RetryStrategy::new(RetryOptions::default())),
        Arc::new(BulkheadStrategy::new(BulkheadOptions::new(-1, 0))),
    ])
}

fn policy_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let empty = ComposedStrategy::default();
    c.bench_function("empty_chain", |b| {
        b.iter(|| runtime.block_on(empty.run(|| async { anyhow::Ok(black_box(1)) }, None)))
    });

    let strategy = chain();
    c.bench_function("three_strategy_chain", |b| {
        b.iter(|| runtime.block_on(strategy.run(|| async { anyhow::Ok(black_box(1)) }, None)))
    });

    let policy = Policy::from_strategy(chain());
    c.bench_function("policy_execute", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let request = policy.execute(|| async { anyhow::Ok(black_box(1)) }, None);
                request.response().await
            })
        })
    });
}

criterion_group!(benches, policy_benchmark);
criterion_main!(benches);
