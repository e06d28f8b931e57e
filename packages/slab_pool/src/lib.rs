#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Slab allocators that hand out fixed-length blocks of raw memory.
//!
//! This crate provides three kinds of pools, all of which carve nodes out of large slabs obtained
//! from the system allocator and recycle them without going back to the allocator for every
//! rental:
//!
//! * [`SlabPool32`] and [`SlabPool64`] hold 32 or 64 nodes per slab and track occupancy with a
//!   bitmap, finding a vacant node with a single trailing-zero count.
//! * [`SlabPool`] holds a configurable number of nodes per slab and tracks vacant nodes with an
//!   intrusive free list.
//! * [`ArrayPool`] serves arrays of `T` in power-of-two size classes, each backed by a
//!   [`SlabPool`] and a small cache of recently released arrays. Unlike the slab pools, it can
//!   be shared between threads.
//!
//! This is part of the [Folo project](https://github.com/folo-rs/folo) that provides mechanisms for
//! high-performance hardware-aware programming in Rust.
//!
//! # Slab lifecycle
//!
//! The slabs of a pool form a ring, one of which is the current slab that rentals are served
//! from. When the current slab is full, the pool moves on to the next slab in the ring, or adds
//! a new slab to the ring if that one is full too. New slabs come from a bounded reserve of
//! vacant slabs when it is not empty, otherwise from the system allocator.
//!
//! When releasing a node leaves a slab completely vacant, the slab leaves the ring and goes into
//! the reserve, or back to the system allocator if the reserve already holds
//! `max_free_slabs` slabs. The current slab is never removed, so a pool always holds at least
//! one slab.
//!
//! # Safety model
//!
//! The slab pools hand out raw [`NonNull<u8>`](std::ptr::NonNull) payload pointers. Releasing a
//! pointer twice, releasing it to a different pool or using it after release or after the pool
//! is dropped is undefined behavior, so [`release()`](SlabPool::release) is an `unsafe fn`.
//! Debug builds catch some of these mistakes with assertions.
//!
//! # Examples
//!
//! ```
//! use slab_pool::{SlabPool32, SlabPool64};
//!
//! let mut pool = SlabPool32::new(16, 1).unwrap();
//!
//! let nodes: Vec<_> = (0..33).map(|_| pool.rent()).collect();
//! assert_eq!(pool.slabs(), 2);
//! assert_eq!(pool.len(), 33);
//!
//! for node in nodes {
//!     // SAFETY: Every node was rented from this pool and is released exactly once.
//!     unsafe {
//!         pool.release(node);
//!     }
//! }
//!
//! // The first slab emptied out while the second one was current, so it went into the reserve.
//! assert_eq!(pool.slabs(), 1);
//! assert_eq!(pool.free_slabs(), 1);
//!
//! let mut pool = SlabPool64::builder().layout_of::<u64>().build().unwrap();
//!
//! let node = pool.rent().cast::<u64>();
//!
//! // SAFETY: The payload has the layout of u64 and we have exclusive access to it.
//! unsafe {
//!     node.write(42);
//!     assert_eq!(node.read(), 42);
//! }
//!
//! // SAFETY: The node was rented from this pool and is released once.
//! unsafe {
//!     pool.release(node.cast());
//! }
//! ```
//!
//! Sharing arrays between threads:
//!
//! ```
//! use std::thread;
//!
//! use slab_pool::ArrayPool;
//!
//! let pool = ArrayPool::<u8>::builder().max_length(1 << 16).build().unwrap();
//!
//! thread::scope(|scope| {
//!     for _ in 0..4 {
//!         scope.spawn(|| {
//!             let array = pool.rent(1500);
//!             assert_eq!(array.len(), 2048);
//!             pool.release(array);
//!         });
//!     }
//! });
//! ```
//!
//! # Metrics
//!
//! The pools report slab allocations, slab recycling, slab eviction into the reserve, slab frees
//! and array cache hits and misses as [`nm`] events with the `slab_pool_` name prefix.

mod array_pool;
mod bitmap_pool;
mod bits;
mod builder;
mod error;
mod free_list_pool;
pub mod memory;
mod metrics;
mod ring;
mod spin_lock;

pub use array_pool::{ArrayPool, MAX_ARRAY_LENGTH, PooledArray, select_bucket_index};
pub use bitmap_pool::{BitmapSlabPool, SlabBitmap, SlabPool32, SlabPool64};
pub use bits::BitScan;
pub use builder::*;
pub use error::{Error, Result};
pub use free_list_pool::SlabPool;
