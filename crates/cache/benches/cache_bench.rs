use cache::Cache;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

const N_ENTRIES: usize = 10_000;

fn filled_cache() -> Cache<Vec<u8>> {
    // Twice the entry count so no shard comes near its capacity and every
    // lookup below is a hit.
    let cache = Cache::new(2 * N_ENTRIES);
    for i in 0..N_ENTRIES {
        let key = format!("key{i:06}");
        drop(cache.insert(key.as_bytes(), vec![b'v'; 64], 1, None));
    }
    cache
}

fn cache_insert_benchmark(c: &mut Criterion) {
    c.bench_function("cache_insert_10k", |b| {
        b.iter_batched(
            || Cache::new(N_ENTRIES),
            |cache| {
                for i in 0..N_ENTRIES {
                    let key = format!("key{i:06}");
                    drop(cache.insert(key.as_bytes(), vec![b'v'; 64], 1, None));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn cache_lookup_hit_benchmark(c: &mut Criterion) {
    c.bench_function("cache_lookup_hit_10k", |b| {
        b.iter_batched(
            filled_cache,
            |cache| {
                for i in 0..N_ENTRIES {
                    let key = format!("key{i:06}");
                    black_box(cache.lookup(key.as_bytes()));
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, cache_insert_benchmark, cache_lookup_hit_benchmark);
criterion_main!(benches);
