// Hot-path benchmarks for the Tessera pipeline.
//
// Covers tier classification over tables of growing size and the full
// verifier check, including the rate limiter's prune-and-record step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tessera_core::clock::SystemClock;
use tessera_core::config::VerifierConfig;
use tessera_core::tier::{classify, PrivacyTier, TierTable};
use tessera_core::verifier::DepositVerifier;
use tessera_core::Deposit;

fn bench_classify_default(c: &mut Criterion) {
    let table = TierTable::default();
    c.bench_function("tier/classify_default", |b| {
        b.iter(|| table.classify(std::hint::black_box(150.0)));
    });
}

fn bench_classify_table_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier/classify_unsorted");
    for size in [4usize, 32, 256] {
        let tiers: Vec<PrivacyTier> = (0..size)
            .rev()
            .map(|i| PrivacyTier::new(format!("T{i}"), (i * 10) as f64))
            .collect();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &tiers, |b, tiers| {
            b.iter(|| classify(std::hint::black_box(123.0), tiers));
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    // A zero window prunes every stamp on the next call, so the wallet
    // never fills up and each iteration takes the accept path.
    let config = VerifierConfig {
        rate_window: Duration::ZERO,
        rate_limit: 1,
        ..VerifierConfig::default()
    };
    let verifier = DepositVerifier::with_config(config, Arc::new(SystemClock));
    let now = Utc::now();
    let deposit = Deposit {
        id: "bench".into(),
        tx_ref: "0xbench".into(),
        wallet: "0x1111111111111111111111111111111111111111".into(),
        amount: 42.0,
        currency: "ETH".into(),
        observed_at: now,
        processed: false,
        created_at: now,
    };

    c.bench_function("verifier/check", |b| {
        b.iter(|| verifier.check(std::hint::black_box(&deposit)));
    });
}

criterion_group!(
    benches,
    bench_classify_default,
    bench_classify_table_size,
    bench_verify
);
criterion_main!(benches);
