//! Dict insert/lookup benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use polyrt::containers::Dict;
use polyrt::value::{Any, AnyView};

fn bench_insert(c: &mut Criterion) {
    c.bench_function("dict_insert_10k_int_keys", |b| {
        b.iter(|| {
            let dict = Dict::new();
            for k in 0..10_000i64 {
                dict.insert(Any::from(k), Any::from(k * 2));
            }
            black_box(dict.len())
        })
    });

    c.bench_function("dict_insert_10k_str_keys", |b| {
        let keys: Vec<String> = (0..10_000).map(|k| format!("key-{k}")).collect();
        b.iter(|| {
            let dict = Dict::new();
            for (k, key) in keys.iter().enumerate() {
                dict.insert(Any::from(key.as_str()), Any::from(k as i64));
            }
            black_box(dict.len())
        })
    });
}

fn bench_lookup(c: &mut Criterion) {
    let dict = Dict::new();
    for k in 0..10_000i64 {
        dict.insert(Any::from(k), Any::from(k * 2));
    }
    c.bench_function("dict_lookup_hit", |b| {
        b.iter(|| {
            let mut total = 0i64;
            for k in 0..10_000i64 {
                total += dict.at(AnyView::from(k)).unwrap().cast::<i64>().unwrap();
            }
            black_box(total)
        })
    });
    c.bench_function("dict_lookup_miss", |b| {
        b.iter(|| {
            let mut misses = 0usize;
            for k in 10_000..20_000i64 {
                if dict.get(AnyView::from(k)).is_none() {
                    misses += 1;
                }
            }
            black_box(misses)
        })
    });
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
