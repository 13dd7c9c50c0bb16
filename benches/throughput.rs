use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use visitguard::security::{GuardSettings, VisitGuard};

// Hot path: one record per request, plus a sweep over a populated trie.

fn addresses(n: u32) -> Vec<String> {
    (0..n)
        .map(|i| {
            let [a, b, c, d] = (0x0A00_0000u32 + i * 7919).to_be_bytes();
            format!("{a}.{b}.{c}.{d}")
        })
        .collect()
}

fn record_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Elements(1));

    let guard = VisitGuard::new(GuardSettings::new(127, 60, 5).unwrap());
    group.bench_function("repeat_address", |b| {
        b.iter(|| {
            let outcome = guard.record(black_box("203.0.113.7"));
            guard.reduce_on_cache_hit("203.0.113.7");
            outcome
        })
    });

    let addrs = addresses(10_000);
    let guard = VisitGuard::new(GuardSettings::new(127, 60, 5).unwrap());
    let mut next = 0usize;
    group.bench_function("spread_addresses", |b| {
        b.iter(|| {
            let outcome = guard.record(black_box(&addrs[next % addrs.len()]));
            next += 1;
            outcome
        })
    });

    group.bench_function("parse_only", |b| {
        b.iter(|| visitguard::security::address::parse_octets(black_box("198.51.100.254")))
    });

    group.finish();
}

fn sweep_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    let addrs = addresses(10_000);
    group.throughput(Throughput::Elements(addrs.len() as u64));

    group.bench_function("populated_trie", |b| {
        b.iter_batched(
            || {
                let guard = VisitGuard::new(GuardSettings::new(127, 60, 5).unwrap());
                for addr in &addrs {
                    guard.record(addr);
                }
                guard
            },
            |guard| guard.sweep(),
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, record_benchmark, sweep_benchmark);
criterion_main!(benches);
