//! Integration tests for the `slab_pool` package, exercising the pools through their public API
//! only.

#![expect(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code, we assume safety is considered"
)]

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use new_zealand::nz;
use slab_pool::{ArrayPool, Error, SlabPool, SlabPool32, SlabPool64, select_bucket_index};

/// The operations every slab pool flavor shares, so the same scenarios can run against each.
trait Pool {
    fn rent(&mut self) -> NonNull<u8>;
    unsafe fn release(&mut self, ptr: NonNull<u8>);
    fn slabs(&self) -> usize;
    fn free_slabs(&self) -> usize;
    fn len(&self) -> usize;
    fn owns(&self, ptr: NonNull<u8>) -> bool;
    fn nodes_per_slab(&self) -> usize;
    fn trim_excess_to(&mut self, capacity: usize) -> usize;
    fn ensure_capacity(&mut self, capacity: usize) -> usize;
}

macro_rules! impl_pool {
    ($($t:ty),*) => {
        $(
            impl Pool for $t {
                fn rent(&mut self) -> NonNull<u8> {
                    <$t>::rent(self)
                }

                unsafe fn release(&mut self, ptr: NonNull<u8>) {
                    unsafe { <$t>::release(self, ptr) }
                }

                fn slabs(&self) -> usize {
                    <$t>::slabs(self)
                }

                fn free_slabs(&self) -> usize {
                    <$t>::free_slabs(self)
                }

                fn len(&self) -> usize {
                    <$t>::len(self)
                }

                fn owns(&self, ptr: NonNull<u8>) -> bool {
                    <$t>::owns(self, ptr)
                }

                fn nodes_per_slab(&self) -> usize {
                    <$t>::nodes_per_slab(self)
                }

                fn trim_excess_to(&mut self, capacity: usize) -> usize {
                    <$t>::trim_excess_to(self, capacity)
                }

                fn ensure_capacity(&mut self, capacity: usize) -> usize {
                    <$t>::ensure_capacity(self, capacity)
                }
            }
        )*
    };
}

impl_pool!(SlabPool32, SlabPool64, SlabPool);

/// One pool of each flavor with 32 nodes per slab and the given reserve bound.
fn pools_of_32(max_free_slabs: usize) -> Vec<Box<dyn Pool>> {
    vec![
        Box::new(SlabPool32::new(24, max_free_slabs).unwrap()),
        Box::new(
            SlabPool::builder()
                .node_length(24)
                .nodes_per_slab(nz!(32))
                .max_free_slabs(max_free_slabs)
                .build()
                .unwrap(),
        ),
    ]
}

fn release_all(pool: &mut dyn Pool, nodes: impl IntoIterator<Item = NonNull<u8>>) {
    for node in nodes {
        unsafe {
            pool.release(node);
        }
    }
}

#[test]
fn rent_then_release_restores_state() {
    for mut pool in pools_of_32(2) {
        let keep: Vec<_> = (0..10).map(|_| pool.rent()).collect();

        let before = (pool.slabs(), pool.free_slabs(), pool.len());

        let node = pool.rent();
        unsafe {
            pool.release(node);
        }

        assert_eq!((pool.slabs(), pool.free_slabs(), pool.len()), before);

        release_all(pool.as_mut(), keep);
        assert_eq!(pool.len(), 0);
    }
}

#[test]
fn outstanding_rentals_never_alias() {
    let mut pools = pools_of_32(0);
    pools.push(Box::new(SlabPool64::new(8, 0).unwrap()));

    for mut pool in pools {
        let nodes: Vec<_> = (0..500).map(|_| pool.rent()).collect();

        let unique: HashSet<_> = nodes.iter().copied().collect();
        assert_eq!(unique.len(), nodes.len());
        assert!(nodes.iter().all(|node| pool.owns(*node)));

        release_all(pool.as_mut(), nodes);
    }
}

#[test]
fn thirty_three_rentals_need_two_slabs() {
    for mut pool in pools_of_32(0) {
        assert_eq!(pool.nodes_per_slab(), 32);

        let nodes: Vec<_> = (0..33).map(|_| pool.rent()).collect();
        assert_eq!(pool.slabs(), 2);

        release_all(pool.as_mut(), nodes);
    }
}

#[test]
fn eviction_goes_to_reserve_until_bound_then_frees() {
    for mut pool in pools_of_32(1) {
        let first: Vec<_> = (0..32).map(|_| pool.rent()).collect();
        let second: Vec<_> = (0..32).map(|_| pool.rent()).collect();
        let third: Vec<_> = (0..1).map(|_| pool.rent()).collect();
        assert_eq!(pool.slabs(), 3);

        release_all(pool.as_mut(), first);
        assert_eq!(pool.slabs(), 2);
        assert_eq!(pool.free_slabs(), 1);

        release_all(pool.as_mut(), second);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);

        release_all(pool.as_mut(), third);
    }
}

#[test]
fn current_slab_survives_becoming_vacant() {
    for mut pool in pools_of_32(1) {
        let nodes: Vec<_> = (0..40).map(|_| pool.rent()).collect();
        assert_eq!(pool.slabs(), 2);

        let (first_slab, second_slab) = nodes.split_at(32);

        release_all(pool.as_mut(), first_slab.iter().copied());
        assert_eq!(pool.free_slabs(), 1);
        assert_eq!(pool.slabs(), 1);

        release_all(pool.as_mut(), second_slab.iter().copied());
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);
        assert_eq!(pool.len(), 0);
    }
}

#[test]
fn trim_excess_to_zero_is_idempotent() {
    for mut pool in pools_of_32(3) {
        assert_eq!(pool.ensure_capacity(3), 3);

        assert_eq!(pool.trim_excess_to(0), 0);
        assert_eq!(pool.free_slabs(), 0);

        assert_eq!(pool.trim_excess_to(0), 0);
        assert_eq!(pool.free_slabs(), 0);
    }
}

#[test]
fn bucket_index_contract() {
    assert_eq!(select_bucket_index(16), 0);
    assert_eq!(select_bucket_index(17), 1);
    assert_eq!(select_bucket_index(32), 1);
    assert_eq!(select_bucket_index(33), 2);

    let indexes: Vec<_> = (0..=70_000).map(select_bucket_index).collect();
    assert!(indexes.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn pool_moves_between_threads() {
    let mut pool = SlabPool64::new(16, 1).unwrap();
    let nodes: Vec<_> = (0..70).map(|_| pool.rent().addr()).collect();

    let pool = thread::spawn(move || {
        for addr in nodes {
            // Ownership is decided by address alone, so a pointer without provenance will do.
            let node = NonNull::new(std::ptr::null_mut::<u8>().with_addr(addr.get())).unwrap();
            assert!(pool.owns(node));
        }

        pool
    })
    .join()
    .unwrap();

    assert_eq!(pool.len(), 70);
}

#[test]
fn array_pool_shared_between_threads() {
    const THREADS: usize = 4;
    const ITERATIONS: usize = 1_000;

    let pool = Arc::new(
        ArrayPool::<u32>::builder()
            .max_length(4096)
            .cache_size(4)
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                let mut held = Vec::new();

                for i in 0..ITERATIONS {
                    let length = 1 + (i * 97 + thread_index * 13) % 4096;
                    let mut array = pool.rent(length);
                    assert!(array.len() >= length);
                    assert!(array.len().is_power_of_two());

                    let marker = u32::try_from(thread_index * ITERATIONS + i).unwrap();
                    for slot in unsafe { array.as_uninit_slice_mut() } {
                        slot.write(marker);
                    }

                    held.push((array, marker));

                    // Keep a few arrays alive at a time so concurrent rentals overlap.
                    if held.len() > 3 {
                        let (array, marker) = held.remove(0);

                        for slot in unsafe { array.as_uninit_slice() } {
                            assert_eq!(unsafe { slot.assume_init() }, marker);
                        }

                        pool.release(array);
                    }
                }

                for (array, _) in held {
                    pool.release(array);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    pool.trim_excess();
}

#[test]
fn array_pool_errors_are_distinguishable() {
    let pool = ArrayPool::<u64>::builder().max_length(256).build().unwrap();
    let other = ArrayPool::<u64>::builder().max_length(256).build().unwrap();

    assert!(matches!(
        pool.try_rent(257),
        Err(Error::LengthOutOfRange {
            length: 257,
            max_length: 256
        })
    ));

    let array = other.rent(10);
    assert!(matches!(
        pool.try_release(array),
        Err(Error::ForeignArray { .. })
    ));

    assert!(matches!(
        ArrayPool::<u64>::builder().max_length(1 << 31).build(),
        Err(Error::MaxLengthOutOfRange { .. })
    ));
}

#[test]
fn array_pool_with_unbounded_cache_builds() {
    let pool = ArrayPool::<u8>::builder()
        .cache_size(usize::MAX)
        .build()
        .unwrap();

    let array = pool.rent(1000);
    assert_eq!(array.len(), 1024);
    pool.release(array);
}
