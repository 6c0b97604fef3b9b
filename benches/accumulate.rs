use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipistorm::measurement::RunStatistics;
use ipistorm::{IpiStorm, Log2Histogram, SyntheticInvoker, VirtualClock};

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate");

    // Per-sample bookkeeping inside the timed loop.
    group.bench_function("stats_and_histogram", |b| {
        let mut stats = RunStatistics::new();
        let mut histogram = Log2Histogram::new();
        let mut state = 1u64;
        b.iter(|| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let sample = state >> 40;
            stats.update(black_box(sample));
            histogram.record(black_box(sample));
        });
        black_box((stats.count(), histogram.total()));
    });
    group.finish();
}

fn bench_synthetic_run(c: &mut Criterion) {
    let cores = match core_affinity::get_core_ids() {
        Some(cores) if cores.len() >= 2 => cores,
        _ => return,
    };
    let storm = IpiStorm::new()
        .source(cores[0].id)
        .target(cores[1].id)
        .timeout_secs(1)
        .preflight(false);

    let mut group = c.benchmark_group("run");
    group.sample_size(10);
    // One virtual second at 50 us per call: 20k loop iterations plus setup.
    group.bench_function("synthetic_virtual_1s", |b| {
        b.iter(|| {
            let clock = VirtualClock::new();
            let invoker = SyntheticInvoker::new(clock.clone(), 50_000);
            let report = storm.run_with(clock, &invoker);
            black_box(report.map(|r| r.iterations).unwrap_or(0))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_accumulate, bench_synthetic_run);
criterion_main!(benches);
