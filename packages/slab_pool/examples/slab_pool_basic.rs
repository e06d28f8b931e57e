//! Basic usage example for the slab pools.
//!
//! This example rents nodes from a bitmap slab pool until it grows a second slab, releases them
//! again and shows how vacant slabs move into the reserve. It then rents arrays from an
//! `ArrayPool` on several threads at once.

use std::thread;

use slab_pool::{ArrayPool, SlabPool32};

fn main() {
    let mut pool = SlabPool32::builder()
        .layout_of::<[u64; 4]>()
        .max_free_slabs(2)
        .build()
        .expect("a slab of 32 nodes of 32 bytes fits in memory");

    println!(
        "Created SlabPool32 with {} nodes per slab of {} bytes each",
        pool.nodes_per_slab(),
        pool.node_length()
    );

    let nodes: Vec<_> = (0..40_u64)
        .map(|i| {
            let node = pool.rent().cast::<[u64; 4]>();

            // SAFETY: The payload has the layout of [u64; 4] and we have exclusive access to it.
            unsafe {
                node.write([i; 4]);
            }

            node
        })
        .collect();

    println!(
        "Rented {} nodes, pool now has {} slabs in service",
        pool.len(),
        pool.slabs()
    );

    if let Some(last) = nodes.last() {
        // SAFETY: The node was initialized above and has not been released yet.
        let value = unsafe { last.read() };
        println!("Last node holds {value:?}");
    }

    for node in nodes {
        // SAFETY: Every node was rented from this pool and is released exactly once.
        unsafe {
            pool.release(node.cast());
        }
    }

    println!(
        "Released everything: {} slabs in service, {} in reserve",
        pool.slabs(),
        pool.free_slabs()
    );

    let trimmed = pool.trim_excess();
    println!("After trimming: {trimmed} slabs in reserve");

    let arrays = ArrayPool::<f32>::builder()
        .max_length(1 << 16)
        .build()
        .expect("the maximum length is within the supported range");

    thread::scope(|scope| {
        for worker in 0..4 {
            let arrays = &arrays;

            scope.spawn(move || {
                let array = arrays.rent(1000 * (worker + 1));
                println!(
                    "Worker {worker} asked for {} elements and got {}",
                    1000 * (worker + 1),
                    array.len()
                );
                arrays.release(array);
            });
        }
    });

    arrays.trim_excess();
}
