//! Metrics for slab lifecycle and array pool cache behavior.
//!
//! Every event is a plain counter observed once per occurrence. The events are per-thread
//! instances to keep observation overhead negligible on the rent/release hot paths, which only
//! touch them when a slab changes state or when an array pool bucket is consulted.

use std::thread::LocalKey;

use nm::Event;

thread_local! {
    /// A new slab was obtained from the system allocator.
    pub(crate) static SLABS_ALLOCATED: Event = Event::builder()
        .name("slab_pool_slabs_allocated")
        .build();

    /// A slab was taken out of a pool's reserve and put back into service.
    pub(crate) static SLABS_RECYCLED: Event = Event::builder()
        .name("slab_pool_slabs_recycled")
        .build();

    /// An empty slab was evicted from service into a pool's reserve.
    pub(crate) static SLABS_RESERVED: Event = Event::builder()
        .name("slab_pool_slabs_reserved")
        .build();

    /// A slab was returned to the system allocator.
    pub(crate) static SLABS_FREED: Event = Event::builder()
        .name("slab_pool_slabs_freed")
        .build();

    /// An array pool rental was served from a bucket's cache.
    pub(crate) static ARRAY_CACHE_HITS: Event = Event::builder()
        .name("slab_pool_array_cache_hits")
        .build();

    /// An array pool rental fell through to the bucket's slab pool.
    pub(crate) static ARRAY_CACHE_MISSES: Event = Event::builder()
        .name("slab_pool_array_cache_misses")
        .build();
}

/// Observes one occurrence of `event`.
///
/// Pools may be dropped from thread-local destructors after the events have been torn down, in
/// which case the observation is silently skipped.
pub(crate) fn observe_once(event: &'static LocalKey<Event>) {
    _ = event.try_with(|event| event.observe_once());
}
