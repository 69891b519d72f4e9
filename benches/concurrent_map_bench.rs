use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rw_hashmap::ConcurrentMap;
use std::thread;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> (ConcurrentMap<String, u64>, Vec<String>) {
    let m = ConcurrentMap::with_capacity(n);
    let keys: Vec<_> = lcg(seed).take(n).map(key).collect();
    for (i, k) in keys.iter().enumerate() {
        m.set(k.clone(), i as u64);
    }
    (m, keys)
}

fn bench_set(c: &mut Criterion) {
    c.bench_function("concurrent_map_set_10k", |b| {
        b.iter_batched(
            || {
                let keys: Vec<_> = lcg(1).take(10_000).map(key).collect();
                (ConcurrentMap::<String, u64>::new(), keys)
            },
            |(m, keys)| {
                for (i, k) in keys.into_iter().enumerate() {
                    m.set(k, i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("concurrent_map_get_hit", |b| {
        let (m, keys) = filled(7, 20_000);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get(k));
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("concurrent_map_get_miss", |b| {
        let (m, _keys) = filled(11, 10_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in map
            let k = key(miss.next().unwrap());
            black_box(m.get(&k));
        })
    });
}

fn bench_iter(c: &mut Criterion) {
    c.bench_function("concurrent_map_iter_10k", |b| {
        let (m, _keys) = filled(13, 10_000);
        b.iter(|| black_box(m.iter().count()))
    });
}

// Four readers and one writer on the same map per iteration.
fn bench_contended(c: &mut Criterion) {
    c.bench_function("concurrent_map_contended_4r1w", |b| {
        let (m, keys) = filled(17, 1_000);
        b.iter(|| {
            thread::scope(|s| {
                for t in 0..4 {
                    let (m, keys) = (&m, &keys);
                    s.spawn(move || {
                        for k in keys.iter().skip(t).step_by(4) {
                            black_box(m.get(k));
                        }
                    });
                }
                s.spawn(|| {
                    for (i, k) in keys.iter().enumerate().step_by(8) {
                        m.set(k.clone(), i as u64);
                    }
                });
            });
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_set, bench_get_hit, bench_get_miss, bench_iter, bench_contended
}
criterion_main!(benches);
