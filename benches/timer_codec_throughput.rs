//! Timer wheel, codec and mailbox throughput benchmarks.
//!
//! Measures timer insert/expire cost, value encode/decode throughput and
//! await-RPC round-trip latency using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use wheelhouse::codec::{decode, encode, Value};
use wheelhouse::timer::TimerManager;
use wheelhouse::{args, Config, Registry};

fn bench_timer_insert_expire(c: &mut Criterion) {
    let counts: &[u64] = &[100, 1_000, 10_000];

    let mut group = c.benchmark_group("timer_insert_expire");
    for &count in counts {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter(|| {
                let mut mgr = TimerManager::new(0);
                for i in 0..n {
                    // Spread across levels 0-2
                    mgr.add_timer(0, (i * 37) % 100_000, i).unwrap();
                }
                let mut fired = 0usize;
                let mut now = 0;
                while !mgr.is_empty() {
                    now += 64;
                    fired += mgr.execute(now, usize::MAX).len();
                }
                black_box(fired)
            });
        });
    }
    group.finish();
}

fn sample_value(width: usize) -> Value {
    let mut map = BTreeMap::new();
    for i in 0..width {
        map.insert(
            Value::from(format!("field_{}", i)),
            Value::List(vec![
                Value::from(i as u32),
                Value::from(-(i as i64)),
                Value::from(i as f64 * 0.5),
                Value::from("payload"),
            ]),
        );
    }
    Value::Map(map)
}

fn bench_codec(c: &mut Criterion) {
    let widths: &[usize] = &[1, 16, 256];

    let mut group = c.benchmark_group("codec_encode");
    for &width in widths {
        let value = sample_value(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &value, |b, v| {
            b.iter(|| encode(black_box(v)));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("codec_decode");
    for &width in widths {
        let wire = encode(&sample_value(width));
        group.bench_with_input(BenchmarkId::from_parameter(width), &wire, |b, w| {
            b.iter(|| decode(black_box(w)).unwrap());
        });
    }
    group.finish();
}

fn bench_await_rpc(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = Registry::new(Config::default()).unwrap();
    let module = registry.module("bench").unwrap();
    module
        .register_rpc_handler("echo", |_ctx, args| args.to_vec())
        .unwrap();
    rt.block_on(async { registry.start() }).unwrap();

    c.bench_function("await_rpc_round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                module
                    .await_rpc_call("echo", args![1, "a"])
                    .await
                    .unwrap()
            })
        });
    });

    rt.block_on(registry.close());
}

criterion_group!(benches, bench_timer_insert_expire, bench_codec, bench_await_rpc);
criterion_main!(benches);
