/// Performance benchmarks for histsync
///
/// Run with: cargo bench -p histsync-tests

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use histsync_core::analytics::analyze;
use histsync_core::types::DAY_MS;
use histsync_core::{FetchConfig, HistoryFetcher, ManualClock};
use histsync_sync::{deduplicate, resolve_conflicts, ConflictStrategy, DedupStrategy};
use histsync_test_utils::{synthetic_source, NOW};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_fetch_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_all");
    group.sample_size(10);
    let rt = Runtime::new().unwrap();

    for size in [10_000usize, 100_000, 250_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &size, |b, &size| {
            // 1000 visits a day
            let source = Arc::new(synthetic_source(size, NOW - 1, DAY_MS / 1_000));
            let fetcher = HistoryFetcher::new(source)
                .with_clock(Arc::new(ManualClock::new(NOW)))
                .with_config(FetchConfig::new().with_per_call_cap(100_000));

            b.iter(|| {
                let records = rt.block_on(fetcher.fetch_all(black_box(1_000_000))).unwrap();
                assert_eq!(records.len(), size);
            });
        });
    }
    group.finish();
}

fn bench_dense_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_dense");
    group.sample_size(10);
    let rt = Runtime::new().unwrap();

    for cap in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("cap", cap), &cap, |b, &cap| {
            // 50k visits within a few hours
            let source = Arc::new(synthetic_source(50_000, NOW - 1, 250));
            let fetcher = HistoryFetcher::new(source)
                .with_clock(Arc::new(ManualClock::new(NOW)))
                .with_config(FetchConfig::new().with_per_call_cap(cap));

            b.iter(|| rt.block_on(fetcher.fetch_recent(0, black_box(1_000_000))).unwrap());
        });
    }
    group.finish();
}

fn bench_merge_and_analyze(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let local_source = Arc::new(synthetic_source(50_000, NOW - 1, 60_000));
    let remote_source = Arc::new(synthetic_source(50_000, NOW - 30_000, 60_000));
    let local = rt
        .block_on(
            HistoryFetcher::new(local_source)
                .with_clock(Arc::new(ManualClock::new(NOW)))
                .fetch_all(1_000_000),
        )
        .unwrap();
    let remote = rt
        .block_on(
            HistoryFetcher::new(remote_source)
                .with_clock(Arc::new(ManualClock::new(NOW)))
                .fetch_all(1_000_000),
        )
        .unwrap();

    c.bench_function("resolve_conflicts_smart_50k", |b| {
        b.iter(|| resolve_conflicts(black_box(&local), black_box(&remote), ConflictStrategy::Smart))
    });

    c.bench_function("deduplicate_url_50k", |b| {
        b.iter(|| deduplicate(black_box(&local), DedupStrategy::Url))
    });

    c.bench_function("analyze_50k", |b| b.iter(|| analyze(black_box(&local))));
}

criterion_group!(benches, bench_fetch_all, bench_dense_fetch, bench_merge_and_analyze);
criterion_main!(benches);
