use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::ring::{SlabKind, SlabLinks, SlabRing, generate_pool_id};
use crate::{Error, Result, SlabPoolBuilder};

/// Header at the start of every free-list slab. The nodes follow at `FreeListSlabKind::nodes_offset`.
#[repr(C)]
#[expect(
    dead_code,
    reason = "the links are accessed by the ring through the slab pointer, which doubles as a SlabLinks pointer"
)]
struct FreeListSlab {
    links: SlabLinks,

    /// First vacant node of the slab, `None` if every node is rented.
    free_head: Option<NonNull<NodeLink>>,

    /// Number of nodes reachable from `free_head`.
    free_count: usize,

    /// ID of the pool that owns the slab, checked on release in debug builds.
    #[cfg(debug_assertions)]
    owner: u64,
}

/// Header in front of every node payload.
enum NodeLink {
    Vacant {
        next_free: Option<NonNull<NodeLink>>,
    },
    Occupied {
        slab: NonNull<FreeListSlab>,
    },
}

/// Layout calculations for the slabs of one [`SlabPool`].
#[derive(Debug)]
pub(crate) struct FreeListSlabKind {
    payload_layout: Layout,

    nodes_per_slab: NonZero<usize>,

    /// Distance between the starts of two consecutive nodes.
    stride: usize,

    /// Offset of the payload from the start of its node, i.e. from its `NodeLink`.
    payload_offset: usize,

    /// Offset of the first node from the start of the slab.
    nodes_offset: usize,

    slab_layout: Layout,

    #[cfg_attr(
        not(debug_assertions),
        expect(
            dead_code,
            reason = "Used in cfg(debug_assertions) for slab ownership checking"
        )
    )]
    owner: u64,
}

impl FreeListSlabKind {
    fn calculate(
        payload_layout: Layout,
        nodes_per_slab: NonZero<usize>,
        owner: u64,
    ) -> Result<Self> {
        let too_large = || Error::LayoutTooLarge {
            node_size: payload_layout.size(),
            nodes_per_slab: nodes_per_slab.get(),
        };

        let (node_layout, payload_offset) = Layout::new::<NodeLink>()
            .extend(payload_layout)
            .map_err(|_layout_error| too_large())?;

        let node_layout = node_layout.pad_to_align();
        let stride = node_layout.size();

        let nodes_layout = Layout::from_size_align(
            stride
                .checked_mul(nodes_per_slab.get())
                .ok_or_else(too_large)?,
            node_layout.align(),
        )
        .map_err(|_layout_error| too_large())?;

        let (slab_layout, nodes_offset) = Layout::new::<FreeListSlab>()
            .extend(nodes_layout)
            .map_err(|_layout_error| too_large())?;

        Ok(Self {
            payload_layout,
            nodes_per_slab,
            stride,
            payload_offset,
            nodes_offset,
            slab_layout: slab_layout.pad_to_align(),
            owner,
        })
    }

    /// # Safety
    ///
    /// `slab` must be a slab of this kind and `index` must be below `nodes_per_slab`.
    unsafe fn node(&self, slab: NonNull<SlabLinks>, index: usize) -> NonNull<NodeLink> {
        // Cannot overflow because the slab layout calculation checked the total size.
        let offset = self
            .nodes_offset
            .wrapping_add(index.wrapping_mul(self.stride));

        // SAFETY: The offset stays within the slab allocation for any valid index.
        unsafe { slab.cast::<u8>().byte_add(offset).cast() }
    }

    fn payload_of(&self, node: NonNull<NodeLink>) -> NonNull<u8> {
        // SAFETY: Every node is followed by its payload within the same slab.
        unsafe { node.cast::<u8>().byte_add(self.payload_offset) }
    }

    /// # Safety
    ///
    /// `payload` must have been obtained from `payload_of()`.
    unsafe fn node_of(&self, payload: NonNull<u8>) -> NonNull<NodeLink> {
        // SAFETY: Forwarding guarantee from the caller; the node header precedes the payload.
        unsafe { payload.byte_sub(self.payload_offset).cast() }
    }
}

impl SlabKind for FreeListSlabKind {
    fn slab_layout(&self) -> Layout {
        self.slab_layout
    }

    unsafe fn initialize(&self, slab: NonNull<SlabLinks>) {
        let count = self.nodes_per_slab.get();

        // Thread the free list through the nodes in address order, so the first rentals from a
        // fresh slab are contiguous.
        for index in 0..count {
            // Cannot overflow because index < count.
            let following = index.wrapping_add(1);

            let next_free = if following < count {
                // SAFETY: The index is below nodes_per_slab.
                Some(unsafe { self.node(slab, following) })
            } else {
                None
            };

            // SAFETY: The caller guarantees exclusive access to the slab and the index is valid.
            unsafe {
                self.node(slab, index).write(NodeLink::Vacant { next_free });
            }
        }

        let header = slab.cast::<FreeListSlab>();

        // SAFETY: The caller guarantees exclusive access to a slab of our layout. The links
        // belong to the ring, so only the remaining fields are written.
        unsafe {
            (*header.as_ptr()).free_head = Some(self.node(slab, 0));
            (*header.as_ptr()).free_count = count;
        }

        #[cfg(debug_assertions)]
        // SAFETY: As above.
        unsafe {
            (*header.as_ptr()).owner = self.owner;
        }
    }

    unsafe fn is_full(&self, slab: NonNull<SlabLinks>) -> bool {
        // SAFETY: The caller guarantees this is an initialized slab of our kind.
        unsafe { (*slab.cast::<FreeListSlab>().as_ptr()).free_count == 0 }
    }
}

/// A slab pool of fixed-length nodes with a configurable number of nodes per slab.
///
/// Each slab threads an intrusive free list through its vacant nodes. A rented node carries a
/// pointer back to its slab in the header that precedes the payload, which is how
/// [`release()`](Self::release) finds the slab again.
///
/// The ring, reserve and eviction rules are the same as for
/// [`BitmapSlabPool`](crate::BitmapSlabPool).
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use slab_pool::SlabPool;
///
/// let mut pool = SlabPool::builder()
///     .layout_of::<[u64; 4]>()
///     .nodes_per_slab(NonZero::new(128).unwrap())
///     .max_free_slabs(1)
///     .build()
///     .unwrap();
///
/// let node = pool.rent().cast::<[u64; 4]>();
///
/// // SAFETY: The payload has the layout of [u64; 4] and we have exclusive access to it.
/// unsafe {
///     node.write([1, 2, 3, 4]);
///     assert_eq!(node.read()[2], 3);
/// }
///
/// // SAFETY: The node was rented from this pool and is released once.
/// unsafe {
///     pool.release(node.cast());
/// }
///
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not [`Sync`].
#[derive(Debug)]
pub struct SlabPool {
    ring: SlabRing<FreeListSlabKind>,

    /// Number of rented nodes.
    len: usize,
}

impl SlabPool {
    /// Creates a builder for configuring and constructing a [`SlabPool`].
    #[inline]
    pub fn builder() -> SlabPoolBuilder {
        SlabPoolBuilder::new()
    }

    /// Creates a pool of byte-aligned nodes of `node_length` bytes with the default number of
    /// nodes per slab, keeping at most `max_free_slabs` vacant slabs in reserve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayoutTooLarge`] if a slab of such nodes does not fit in memory.
    pub fn new(node_length: usize, max_free_slabs: usize) -> Result<Self> {
        Self::builder()
            .node_length(node_length)
            .max_free_slabs(max_free_slabs)
            .build()
    }

    /// Checks that slabs of `nodes_per_slab` nodes with the given payload layout fit in memory,
    /// without allocating anything.
    pub(crate) fn check_layout(
        payload_layout: Layout,
        nodes_per_slab: NonZero<usize>,
    ) -> Result<()> {
        FreeListSlabKind::calculate(payload_layout, nodes_per_slab, 0).map(|_kind| ())
    }

    pub(crate) fn new_inner(
        payload_layout: Layout,
        nodes_per_slab: NonZero<usize>,
        max_free_slabs: usize,
    ) -> Result<Self> {
        let kind = FreeListSlabKind::calculate(payload_layout, nodes_per_slab, generate_pool_id())?;

        Ok(Self {
            ring: SlabRing::new(kind, max_free_slabs),
            len: 0,
        })
    }

    /// Rents a node and returns a pointer to its uninitialized payload.
    ///
    /// The payload stays valid until it is passed to [`release()`](Self::release) or the pool
    /// is dropped.
    #[must_use]
    pub fn rent(&mut self) -> NonNull<u8> {
        let slab = self.ring.vacant_slab();
        let header = slab.cast::<FreeListSlab>();

        // SAFETY: The ring only hands out live, initialized slabs of our kind and we hold an
        // exclusive reference to the pool that owns them.
        let header = unsafe { &mut *header.as_ptr() };

        let node = header
            .free_head
            .expect("the ring only returns slabs that have a vacant node");

        // SAFETY: Nodes on the free list are live and hold a Vacant link.
        let NodeLink::Vacant { next_free } = (unsafe { node.read() }) else {
            panic!("node {node:?} on the free list is marked as occupied");
        };

        header.free_head = next_free;

        // Cannot underflow because the slab had a vacant node.
        header.free_count = header.free_count.wrapping_sub(1);

        // SAFETY: The node was just taken off the free list, so nothing else references it.
        unsafe {
            node.write(NodeLink::Occupied {
                slab: slab.cast(),
            });
        }

        // Cannot overflow because every rented node occupies memory.
        self.len = self.len.wrapping_add(1);

        self.ring.kind().payload_of(node)
    }

    /// Releases a node previously obtained from [`rent()`](Self::rent).
    ///
    /// # Panics
    ///
    /// Panics if the node is not currently rented, as long as the memory still belongs to a
    /// slab of this pool. In debug builds, also panics if the node was rented from a different
    /// pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `ptr` was returned by [`rent()`](Self::rent) on this pool.
    /// - `ptr` has not been released since it was rented.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        // SAFETY: The caller guarantees this payload came from payload_of() on this pool.
        let node = unsafe { self.ring.kind().node_of(ptr) };

        // SAFETY: Every node of a live slab holds an initialized link.
        let NodeLink::Occupied { slab } = (unsafe { node.read() }) else {
            panic!("released node {node:?} which is not rented");
        };

        // SAFETY: The back-pointer of a rented node points at its live slab.
        let header = unsafe { &mut *slab.as_ptr() };

        #[cfg(debug_assertions)]
        assert_eq!(
            header.owner,
            self.ring.kind().owner,
            "released a pointer that was rented from a different pool"
        );

        // SAFETY: The node is rented by the caller, who is handing it back to us.
        unsafe {
            node.write(NodeLink::Vacant {
                next_free: header.free_head,
            });
        }

        header.free_head = Some(node);

        // Cannot overflow because the node was rented, so free_count < nodes_per_slab.
        header.free_count = header.free_count.wrapping_add(1);

        let now_vacant = header.free_count == self.ring.kind().nodes_per_slab.get();

        // Cannot underflow because the node was rented.
        self.len = self.len.wrapping_sub(1);

        if now_vacant {
            // SAFETY: The slab belongs to our ring and every one of its nodes is vacant.
            unsafe {
                self.ring.retire(slab.cast());
            }
        }
    }

    /// Fills the reserve with vacant slabs until it holds `capacity` of them, capped at
    /// [`max_free_slabs()`](Self::max_free_slabs). Returns the new reserve size.
    pub fn ensure_capacity(&mut self, capacity: usize) -> usize {
        self.ring.ensure_capacity(capacity)
    }

    /// Frees every slab in the reserve. Returns the new reserve size, which is zero.
    pub fn trim_excess(&mut self) -> usize {
        self.ring.trim_excess_to(0)
    }

    /// Frees slabs from the reserve until at most `capacity` remain. Returns the new reserve
    /// size.
    pub fn trim_excess_to(&mut self, capacity: usize) -> usize {
        self.ring.trim_excess_to(capacity)
    }

    /// Number of slabs in service (the ring), including the current slab.
    #[must_use]
    #[inline]
    pub fn slabs(&self) -> usize {
        self.ring.slabs()
    }

    /// Number of vacant slabs held in reserve.
    #[must_use]
    #[inline]
    pub fn free_slabs(&self) -> usize {
        self.ring.free_slabs()
    }

    /// Upper bound on [`free_slabs()`](Self::free_slabs).
    #[must_use]
    #[inline]
    pub fn max_free_slabs(&self) -> usize {
        self.ring.max_free_slabs()
    }

    /// Length in bytes of each node payload.
    #[must_use]
    #[inline]
    pub fn node_length(&self) -> usize {
        self.ring.kind().payload_layout.size()
    }

    /// Memory layout of each node payload.
    #[must_use]
    #[inline]
    pub fn node_layout(&self) -> Layout {
        self.ring.kind().payload_layout
    }

    /// Number of nodes in each slab.
    #[must_use]
    #[inline]
    pub fn nodes_per_slab(&self) -> usize {
        self.ring.kind().nodes_per_slab.get()
    }

    /// Number of nodes currently rented.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no node is currently rented.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `ptr` points into a slab currently in service in this pool. O(slabs).
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.ring.contains(ptr)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    fn integrity_check(&self) {
        self.ring.integrity_check();

        let mut vacant_total: usize = 0;

        for slab in self.ring.iter() {
            // SAFETY: The ring only contains live, initialized slabs of our kind.
            let header = unsafe { &*slab.cast::<FreeListSlab>().as_ptr() };

            let mut reachable: usize = 0;
            let mut cursor = header.free_head;

            while let Some(node) = cursor {
                // SAFETY: Nodes on the free list are live.
                let NodeLink::Vacant { next_free } = (unsafe { node.read() }) else {
                    panic!("occupied node {node:?} found on the free list");
                };

                reachable = reachable.wrapping_add(1);
                cursor = next_free;
            }

            assert_eq!(
                reachable, header.free_count,
                "slab {slab:?} reaches {reachable} free nodes but counts {}",
                header.free_count
            );

            vacant_total = vacant_total.wrapping_add(reachable);
        }

        assert_eq!(
            self.slabs() * self.nodes_per_slab() - vacant_total,
            self.len,
            "rented node count does not match the free lists"
        );
    }
}

#[cfg(test)]
#[expect(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code, we assume safety is considered"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::fmt::Debug;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlabPool: Send, Debug);
    assert_not_impl_any!(SlabPool: Sync);

    fn pool(nodes_per_slab: usize, max_free_slabs: usize) -> SlabPool {
        SlabPool::builder()
            .node_length(16)
            .nodes_per_slab(NonZero::new(nodes_per_slab).unwrap())
            .max_free_slabs(max_free_slabs)
            .build()
            .unwrap()
    }

    fn rent_many(pool: &mut SlabPool, count: usize) -> Vec<NonNull<u8>> {
        (0..count).map(|_| pool.rent()).collect()
    }

    fn release_all(pool: &mut SlabPool, nodes: impl IntoIterator<Item = NonNull<u8>>) {
        for node in nodes {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn defaults() {
        let pool = SlabPool::new(24, 2).unwrap();

        assert_eq!(pool.node_length(), 24);
        assert_eq!(pool.nodes_per_slab(), 64);
        assert_eq!(pool.max_free_slabs(), 2);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn rent_release_round_trip() {
        let mut pool = pool(8, 1);

        let keep = rent_many(&mut pool, 3);
        let node = pool.rent();
        assert_eq!(pool.len(), 4);

        unsafe {
            pool.release(node);
        }

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);
        pool.integrity_check();

        // The released node is at the head of the free list, so it is handed out again.
        assert_eq!(pool.rent(), node);

        release_all(&mut pool, keep.into_iter().chain([node]));
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn rented_nodes_are_distinct_and_owned() {
        let mut pool = pool(5, 0);

        let nodes = rent_many(&mut pool, 23);
        let unique: HashSet<_> = nodes.iter().copied().collect();

        assert_eq!(unique.len(), 23);
        assert_eq!(pool.slabs(), 5);
        assert!(nodes.iter().all(|node| pool.owns(*node)));
        pool.integrity_check();

        release_all(&mut pool, nodes);
    }

    #[test]
    fn payloads_do_not_overlap_headers() {
        let mut pool = pool(4, 0);

        let nodes = rent_many(&mut pool, 9);

        for node in &nodes {
            unsafe {
                node.write_bytes(0xFF, 16);
            }
        }

        // Scribbling over every payload must not corrupt any node link or slab header.
        pool.integrity_check();
        release_all(&mut pool, nodes);
        pool.integrity_check();
    }

    #[test]
    fn single_node_slabs() {
        let mut pool = pool(1, 1);

        let a = pool.rent();
        let b = pool.rent();
        let c = pool.rent();
        assert_eq!(pool.slabs(), 3);

        release_all(&mut pool, [a, b]);
        assert_eq!(pool.free_slabs(), 1);
        pool.integrity_check();

        release_all(&mut pool, [c]);
        assert_eq!(pool.slabs(), 1);
        pool.integrity_check();
    }

    #[test]
    fn eviction_respects_reserve_bound() {
        let mut pool = pool(4, 1);

        let first = rent_many(&mut pool, 4);
        let second = rent_many(&mut pool, 4);
        let third = rent_many(&mut pool, 1);
        assert_eq!(pool.slabs(), 3);

        release_all(&mut pool, first);
        assert_eq!(pool.slabs(), 2);
        assert_eq!(pool.free_slabs(), 1);

        release_all(&mut pool, second);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);
        pool.integrity_check();

        release_all(&mut pool, third);
    }

    #[test]
    fn ensure_capacity_and_trim() {
        let mut pool = pool(4, 3);

        assert_eq!(pool.ensure_capacity(5), 3);
        assert_eq!(pool.trim_excess_to(1), 1);
        assert_eq!(pool.trim_excess(), 0);
        assert_eq!(pool.trim_excess(), 0);
        pool.integrity_check();
    }

    #[test]
    fn reserved_slab_is_fully_vacant_when_reused() {
        let mut pool = pool(4, 1);

        let first = rent_many(&mut pool, 4);
        let second = rent_many(&mut pool, 2);
        release_all(&mut pool, first);
        assert_eq!(pool.free_slabs(), 1);

        // Fill the current slab, then take the reserved one back into service.
        let more = rent_many(&mut pool, 2 + 4);
        assert_eq!(pool.free_slabs(), 0);
        assert_eq!(pool.slabs(), 2);
        pool.integrity_check();

        release_all(&mut pool, second.into_iter().chain(more));
    }

    #[test]
    fn payloads_honor_alignment() {
        let mut pool = SlabPool::builder()
            .layout(Layout::from_size_align(24, 32).unwrap())
            .nodes_per_slab(nz!(7))
            .build()
            .unwrap();

        let nodes = rent_many(&mut pool, 20);
        assert!(nodes.iter().all(|node| node.as_ptr().addr() % 32 == 0));

        release_all(&mut pool, nodes);
    }

    #[test]
    fn oversized_layout_is_error() {
        let result = SlabPool::builder()
            .node_length(usize::MAX / 4)
            .nodes_per_slab(nz!(8))
            .build();

        assert!(matches!(
            result,
            Err(Error::LayoutTooLarge {
                nodes_per_slab: 8,
                ..
            })
        ));
    }

    #[test]
    fn check_layout_accounts_for_node_header() {
        let fits = Layout::from_size_align(1024, 8).unwrap();
        SlabPool::check_layout(fits, nz!(64)).unwrap();

        // A valid layout on its own, but adding the node header pushes it past isize::MAX.
        let payload = Layout::from_size_align(isize::MAX as usize - 7, 8).unwrap();

        assert!(matches!(
            SlabPool::check_layout(payload, nz!(1)),
            Err(Error::LayoutTooLarge {
                nodes_per_slab: 1,
                ..
            })
        ));
    }

    #[test]
    #[should_panic]
    fn double_release_panics() {
        let mut pool = pool(4, 0);

        let _keep = pool.rent();
        let node = pool.rent();

        unsafe {
            pool.release(node);
            pool.release(node);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn release_to_wrong_pool_panics_in_debug() {
        let mut a = pool(4, 0);
        let mut b = pool(4, 0);

        let node = a.rent();

        unsafe {
            b.release(node);
        }
    }
}
