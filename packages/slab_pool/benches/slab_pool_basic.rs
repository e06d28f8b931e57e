//! Basic benchmarks for the `slab_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use slab_pool::{ArrayPool, SlabPool, SlabPool32, SlabPool64};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const NODE_LENGTH: usize = 64;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab_pool_basic");

    group.bench_function("build_empty_pool32", |b| {
        b.iter(|| drop(black_box(SlabPool32::new(NODE_LENGTH, 1).unwrap())));
    });

    group.bench_function("rent_one_pool32", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| SlabPool32::new(NODE_LENGTH, 1).unwrap())
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.rent());
            }

            start.elapsed()
        });
    });

    group.bench_function("rent_release_pool32", |b| {
        let mut pool = SlabPool32::new(NODE_LENGTH, 1).unwrap();

        b.iter(|| {
            let node = black_box(pool.rent());

            // SAFETY: The node was rented from this pool and is released once.
            unsafe {
                pool.release(node);
            }
        });
    });

    group.bench_function("rent_release_pool64", |b| {
        let mut pool = SlabPool64::new(NODE_LENGTH, 1).unwrap();

        b.iter(|| {
            let node = black_box(pool.rent());

            // SAFETY: The node was rented from this pool and is released once.
            unsafe {
                pool.release(node);
            }
        });
    });

    group.bench_function("rent_release_free_list", |b| {
        let mut pool = SlabPool::new(NODE_LENGTH, 1).unwrap();

        b.iter(|| {
            let node = black_box(pool.rent());

            // SAFETY: The node was rented from this pool and is released once.
            unsafe {
                pool.release(node);
            }
        });
    });

    // Crosses slab boundaries on every iteration, exercising the ring and the reserve.
    group.bench_function("rent_release_100_free_list", |b| {
        let mut pool = SlabPool::new(NODE_LENGTH, 2).unwrap();
        let mut nodes = Vec::with_capacity(100);

        b.iter(|| {
            nodes.extend(iter::repeat_with(|| pool.rent()).take(100));

            for node in nodes.drain(..) {
                // SAFETY: The node was rented from this pool and is released once.
                unsafe {
                    pool.release(black_box(node));
                }
            }
        });
    });

    group.bench_function("rent_release_array_cached", |b| {
        let pool = ArrayPool::<u64>::builder().max_length(4096).build().unwrap();

        b.iter(|| {
            let array = pool.rent(black_box(1000));
            pool.release(black_box(array));
        });
    });

    group.bench_function("rent_release_array_uncached", |b| {
        let pool = ArrayPool::<u64>::builder()
            .max_length(4096)
            .cache_size(0)
            .build()
            .unwrap();

        b.iter(|| {
            let array = pool.rent(black_box(1000));
            pool.release(black_box(array));
        });
    });

    group.finish();
}
