use std::alloc::Layout;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::ring::{SlabKind, SlabLinks, SlabRing, generate_pool_id};
use crate::{BitScan, BitmapSlabPoolBuilder, Error, Result};

/// Occupancy bitmap of a [`BitmapSlabPool`] slab. One bit per node, so the bit width is also
/// the number of nodes per slab.
///
/// Implemented for `u32` and `u64`.
pub trait SlabBitmap: BitScan + Debug + Send + Sync + 'static {
    /// No node is rented.
    const EMPTY: Self;

    /// Every node is rented.
    const FULL: Self;

    /// Index of the lowest `0` bit, i.e. the first vacant node. Equals [`BitScan::BITS`] if the
    /// bitmap is full.
    #[must_use]
    fn lowest_clear_bit(self) -> u32;

    /// Whether the bit at `index` is set.
    #[must_use]
    fn is_set(self, index: usize) -> bool;

    /// Returns the bitmap with the bit at `index` set.
    #[must_use]
    fn with_bit_set(self, index: usize) -> Self;

    /// Returns the bitmap with the bit at `index` cleared.
    #[must_use]
    fn with_bit_cleared(self, index: usize) -> Self;
}

macro_rules! impl_slab_bitmap {
    ($($t:ty),*) => {
        $(
            impl SlabBitmap for $t {
                const EMPTY: Self = 0;
                const FULL: Self = <$t>::MAX;

                #[inline]
                fn lowest_clear_bit(self) -> u32 {
                    (!self).trailing_zero_count()
                }

                #[inline]
                fn is_set(self, index: usize) -> bool {
                    self & (1 << index) != 0
                }

                #[inline]
                fn with_bit_set(self, index: usize) -> Self {
                    self | (1 << index)
                }

                #[inline]
                fn with_bit_cleared(self, index: usize) -> Self {
                    self & !(1 << index)
                }
            }
        )*
    };
}

impl_slab_bitmap!(u32, u64);

/// A slab pool with 32 nodes per slab, tracked by a `u32` bitmap.
pub type SlabPool32 = BitmapSlabPool<u32>;

/// A slab pool with 64 nodes per slab, tracked by a `u64` bitmap.
pub type SlabPool64 = BitmapSlabPool<u64>;

/// Header at the start of every bitmap slab. The nodes follow at `BitmapSlabKind::nodes_offset`.
#[repr(C)]
#[expect(
    dead_code,
    reason = "the links are accessed by the ring through the slab pointer, which doubles as a SlabLinks pointer"
)]
struct BitmapSlab<W> {
    links: SlabLinks,

    /// Bit `i` is set if and only if node `i` is rented.
    bitmap: W,

    /// ID of the pool that owns the slab, checked on release in debug builds.
    #[cfg(debug_assertions)]
    owner: u64,
}

/// Layout calculations for the slabs of one [`BitmapSlabPool`].
///
/// Every node is an index byte followed by the payload. The payload starts at `payload_offset`
/// within the node and the index byte sits immediately before it, so a payload pointer is all
/// that is needed to find the node index, and from there the slab header.
#[derive(Debug)]
pub(crate) struct BitmapSlabKind<W> {
    payload_layout: Layout,

    /// Distance between the starts of two consecutive nodes.
    stride: usize,

    /// Offset of the payload from the start of its node. Always at least 1.
    payload_offset: usize,

    /// Offset of the first node from the start of the slab.
    nodes_offset: usize,

    slab_layout: Layout,

    /// Pool ID stamped into every slab for debug ownership checks.
    #[cfg_attr(
        not(debug_assertions),
        expect(
            dead_code,
            reason = "Used in cfg(debug_assertions) for slab ownership checking"
        )
    )]
    owner: u64,

    _bitmap: PhantomData<W>,
}

impl<W: SlabBitmap> BitmapSlabKind<W> {
    fn calculate(payload_layout: Layout, owner: u64) -> Result<Self> {
        let nodes_per_slab = W::BITS as usize;

        let too_large = || Error::LayoutTooLarge {
            node_size: payload_layout.size(),
            nodes_per_slab,
        };

        let (node_layout, payload_offset) = Layout::new::<u8>()
            .extend(payload_layout)
            .map_err(|_layout_error| too_large())?;

        // Layout::pad_to_align() makes the size a valid stride between array elements.
        let node_layout = node_layout.pad_to_align();
        let stride = node_layout.size();

        let nodes_size = stride.checked_mul(nodes_per_slab).ok_or_else(too_large)?;
        let nodes_layout = Layout::from_size_align(nodes_size, node_layout.align())
            .map_err(|_layout_error| too_large())?;

        let (slab_layout, nodes_offset) = Layout::new::<BitmapSlab<W>>()
            .extend(nodes_layout)
            .map_err(|_layout_error| too_large())?;

        Ok(Self {
            payload_layout,
            stride,
            payload_offset,
            nodes_offset,
            slab_layout: slab_layout.pad_to_align(),
            owner,
            _bitmap: PhantomData,
        })
    }

    fn node_offset(&self, index: usize) -> usize {
        // Cannot overflow because the slab layout calculation checked the total size.
        self.nodes_offset
            .wrapping_add(index.wrapping_mul(self.stride))
            .wrapping_add(self.payload_offset)
    }

    /// # Safety
    ///
    /// `slab` must be a slab of this kind and `index` must be below the bitmap width.
    unsafe fn payload_ptr(&self, slab: NonNull<SlabLinks>, index: usize) -> NonNull<u8> {
        // SAFETY: The offset stays within the slab allocation for any valid index.
        unsafe { slab.cast::<u8>().byte_add(self.node_offset(index)) }
    }

    /// # Safety
    ///
    /// `payload` must have been obtained from `payload_ptr()` with the same `index`.
    unsafe fn slab_of(&self, payload: NonNull<u8>, index: usize) -> NonNull<SlabLinks> {
        // SAFETY: Walking back by the same offset we walked forward by stays in the allocation.
        unsafe { payload.byte_sub(self.node_offset(index)).cast::<SlabLinks>() }
    }
}

impl<W: SlabBitmap> SlabKind for BitmapSlabKind<W> {
    fn slab_layout(&self) -> Layout {
        self.slab_layout
    }

    unsafe fn initialize(&self, slab: NonNull<SlabLinks>) {
        let header = slab.cast::<BitmapSlab<W>>();

        // SAFETY: The caller guarantees exclusive access to a slab of our layout, which starts
        // with a BitmapSlab<W> header.
        unsafe {
            (*header.as_ptr()).bitmap = W::EMPTY;
        }

        #[cfg(debug_assertions)]
        // SAFETY: As above.
        unsafe {
            (*header.as_ptr()).owner = self.owner;
        }

        // The index bytes are written once here. Payloads never overlap them, so they survive
        // any number of rentals.
        for index in 0..W::BITS as usize {
            let index_byte = u8::try_from(index).expect("bitmaps are at most 64 bits wide");

            // SAFETY: The index is in bounds and every payload offset is at least 1, so the
            // byte before the payload is the node's index byte inside the slab.
            unsafe {
                self.payload_ptr(slab, index).sub(1).write(index_byte);
            }
        }
    }

    unsafe fn is_full(&self, slab: NonNull<SlabLinks>) -> bool {
        // SAFETY: The caller guarantees this is an initialized slab of our kind.
        unsafe { (*slab.cast::<BitmapSlab<W>>().as_ptr()).bitmap == W::FULL }
    }
}

/// A slab pool of fixed-length nodes, 32 or 64 per slab, tracked by an occupancy bitmap.
///
/// Renting finds the first vacant node in O(1) via a trailing-zero count of the inverted bitmap.
/// Releasing reads the node index from the byte immediately preceding the payload, walks back to
/// the slab header and clears the bit.
///
/// Slabs form a ring; rentals are served from the current slab. When a slab other than the
/// current one becomes completely vacant, it is moved into a bounded reserve of whole slabs or,
/// if the reserve is at capacity, freed.
///
/// Use the [`SlabPool32`] and [`SlabPool64`] aliases to pick the bitmap width.
///
/// # Examples
///
/// ```
/// use slab_pool::SlabPool32;
///
/// let mut pool = SlabPool32::new(24, 1).unwrap();
///
/// let node = pool.rent();
///
/// // SAFETY: The node payload is 24 bytes long and we have exclusive access to it.
/// unsafe {
///     node.write_bytes(0xFF, 24);
/// }
///
/// // SAFETY: The node was rented from this pool and is released once.
/// unsafe {
///     pool.release(node);
/// }
///
/// assert_eq!(pool.slabs(), 1);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but performs no internal synchronization and is
/// therefore not [`Sync`]. Wrap it in a lock to share it between threads.
#[derive(Debug)]
pub struct BitmapSlabPool<W: SlabBitmap> {
    ring: SlabRing<BitmapSlabKind<W>>,

    /// Number of rented nodes.
    len: usize,
}

impl<W: SlabBitmap> BitmapSlabPool<W> {
    /// Creates a builder for configuring and constructing a [`BitmapSlabPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use slab_pool::SlabPool64;
    ///
    /// let pool = SlabPool64::builder()
    ///     .layout_of::<u128>()
    ///     .max_free_slabs(2)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.nodes_per_slab(), 64);
    /// assert_eq!(pool.node_length(), 16);
    /// ```
    #[inline]
    pub fn builder() -> BitmapSlabPoolBuilder<W> {
        BitmapSlabPoolBuilder::new()
    }

    /// Creates a pool of byte-aligned nodes of `node_length` bytes that keeps at most
    /// `max_free_slabs` vacant slabs in reserve.
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

    pub(crate) fn new_inner(payload_layout: Layout, max_free_slabs: usize) -> Result<Self> {
        let kind = BitmapSlabKind::calculate(payload_layout, generate_pool_id())?;

        Ok(Self {
            ring: SlabRing::new(kind, max_free_slabs),
            len: 0,
        })
    }

    /// Rents a node and returns a pointer to its payload.
    ///
    /// The payload is [`node_length()`](Self::node_length) bytes long, aligned as configured,
    /// and uninitialized. It stays valid until it is passed to [`release()`](Self::release) or
    /// the pool is dropped.
    ///
    /// This never fails; if the system allocator cannot provide a new slab, the allocation
    /// error handler is invoked.
    #[must_use]
    pub fn rent(&mut self) -> NonNull<u8> {
        let slab = self.ring.vacant_slab();
        let header = slab.cast::<BitmapSlab<W>>();

        // SAFETY: The ring only hands out live, initialized slabs of our kind and we hold
        // an exclusive reference to the pool that owns them.
        let bitmap = unsafe { &mut (*header.as_ptr()).bitmap };

        let index = bitmap.lowest_clear_bit() as usize;
        debug_assert!(index < W::BITS as usize, "vacant slab had a full bitmap");

        *bitmap = bitmap.with_bit_set(index);

        // Cannot overflow because every rented node occupies memory.
        self.len = self.len.wrapping_add(1);

        // SAFETY: The index is below the bitmap width because the slab was not full.
        unsafe { self.ring.kind().payload_ptr(slab, index) }
    }

    /// Releases a node previously obtained from [`rent()`](Self::rent).
    ///
    /// If this leaves a slab other than the current one completely vacant, the slab is moved
    /// into the reserve or, if the reserve is at capacity, freed.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the pointer does not belong to a slab of this pool or if the
    /// node is not rented. Neither condition is detected in release builds.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `ptr` was returned by [`rent()`](Self::rent) on this pool.
    /// - `ptr` has not been released since it was rented.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        // SAFETY: The caller guarantees this is a payload of this pool, and every payload is
        // immediately preceded by its node index byte.
        let index = usize::from(unsafe { ptr.sub(1).read() });

        // SAFETY: The caller guarantees the pointer came from payload_ptr() for this index.
        let slab = unsafe { self.ring.kind().slab_of(ptr, index) };
        let header = slab.cast::<BitmapSlab<W>>();

        #[cfg(debug_assertions)]
        {
            // SAFETY: The caller guarantees this is a live slab of this pool.
            let owner = unsafe { (*header.as_ptr()).owner };

            assert_eq!(
                owner,
                self.ring.kind().owner,
                "released a pointer that was rented from a different pool"
            );
        }

        // SAFETY: The caller guarantees this is a live slab of this pool and we hold an
        // exclusive reference to the pool.
        let bitmap = unsafe { &mut (*header.as_ptr()).bitmap };

        debug_assert!(
            bitmap.is_set(index),
            "released node {index} which is not rented"
        );

        *bitmap = bitmap.with_bit_cleared(index);
        let now_vacant = *bitmap == W::EMPTY;

        // Cannot underflow because the caller guarantees the node was rented.
        self.len = self.len.wrapping_sub(1);

        if now_vacant {
            // SAFETY: The slab belongs to our ring and every one of its nodes is vacant.
            unsafe {
                self.ring.retire(slab);
            }
        }
    }

    /// Fills the reserve with vacant slabs until it holds `capacity` of them, capped at
    /// [`max_free_slabs()`](Self::max_free_slabs). Returns the new reserve size.
    ///
    /// # Example
    ///
    /// ```
    /// use slab_pool::SlabPool32;
    ///
    /// let mut pool = SlabPool32::new(8, 3).unwrap();
    ///
    /// assert_eq!(pool.ensure_capacity(2), 2);
    /// assert_eq!(pool.ensure_capacity(10), 3);
    /// ```
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

    /// Number of nodes in each slab, equal to the bitmap width.
    #[must_use]
    #[inline]
    pub fn nodes_per_slab(&self) -> usize {
        W::BITS as usize
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

    /// Whether `ptr` points into a slab currently in service in this pool.
    ///
    /// This walks every slab in service, so it is O(slabs). It does not tell whether the node
    /// is currently rented.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.ring.contains(ptr)
    }

    /// Bitmaps of the slabs in service, starting from the current slab.
    #[cfg(test)]
    fn bitmaps(&self) -> Vec<W> {
        self.ring
            .iter()
            // SAFETY: The ring only contains live, initialized slabs of our kind.
            .map(|slab| unsafe { (*slab.cast::<BitmapSlab<W>>().as_ptr()).bitmap })
            .collect()
    }
}

#[cfg(test)]
#[expect(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code, we assume safety is considered"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlabPool32: Send, Debug);
    assert_impl_all!(SlabPool64: Send, Debug);
    assert_not_impl_any!(SlabPool32: Sync);
    assert_not_impl_any!(SlabPool64: Sync);

    fn rent_many<W: SlabBitmap>(pool: &mut BitmapSlabPool<W>, count: usize) -> Vec<NonNull<u8>> {
        (0..count).map(|_| pool.rent()).collect()
    }

    #[test]
    fn new_pool_has_one_slab() {
        let pool = SlabPool32::new(16, 2).unwrap();

        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);
        assert_eq!(pool.max_free_slabs(), 2);
        assert_eq!(pool.node_length(), 16);
        assert_eq!(pool.nodes_per_slab(), 32);
        assert!(pool.is_empty());
    }

    #[test]
    fn bitmap_helpers() {
        assert_eq!(0_u32.lowest_clear_bit(), 0);
        assert_eq!(0b0111_u32.lowest_clear_bit(), 3);
        assert_eq!(u32::FULL.lowest_clear_bit(), 32);
        assert_eq!(u64::FULL.lowest_clear_bit(), 64);

        let bitmap = 0_u64.with_bit_set(63).with_bit_set(0);
        assert!(bitmap.is_set(63));
        assert!(bitmap.is_set(0));
        assert!(!bitmap.is_set(1));
        assert_eq!(bitmap.with_bit_cleared(63).with_bit_cleared(0), u64::EMPTY);
    }

    #[test]
    fn rent_release_round_trip() {
        let mut pool = SlabPool32::new(8, 1).unwrap();

        let keep = rent_many(&mut pool, 5);
        let before = pool.bitmaps();

        let node = pool.rent();
        assert_ne!(pool.bitmaps(), before);

        unsafe {
            pool.release(node);
        }

        assert_eq!(pool.bitmaps(), before);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);
        assert_eq!(pool.len(), 5);

        for node in keep {
            unsafe {
                pool.release(node);
            }
        }

        assert!(pool.is_empty());
        pool.ring.integrity_check();
    }

    #[test]
    fn rented_nodes_are_distinct_and_owned() {
        let mut pool = SlabPool64::new(12, 0).unwrap();

        let nodes = rent_many(&mut pool, 200);
        let unique: HashSet<_> = nodes.iter().copied().collect();

        assert_eq!(unique.len(), 200);
        assert!(nodes.iter().all(|node| pool.owns(*node)));

        // Payloads must not overlap: writing a distinct pattern into each survives.
        for (i, node) in nodes.iter().enumerate() {
            unsafe {
                node.write_bytes(u8::try_from(i % 251).unwrap(), 12);
            }
        }

        for (i, node) in nodes.iter().enumerate() {
            let expected = u8::try_from(i % 251).unwrap();
            for offset in 0..12 {
                assert_eq!(unsafe { node.add(offset).read() }, expected);
            }
        }

        for node in nodes {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn one_new_slab_per_full_slab() {
        let mut pool = SlabPool32::new(4, 0).unwrap();

        let nodes = rent_many(&mut pool, 32);
        assert_eq!(pool.slabs(), 1);

        let extra = pool.rent();
        assert_eq!(pool.slabs(), 2);

        let more = rent_many(&mut pool, 31);
        assert_eq!(pool.slabs(), 2);

        let last = pool.rent();
        assert_eq!(pool.slabs(), 3);

        for node in nodes.into_iter().chain([extra, last]).chain(more) {
            unsafe {
                pool.release(node);
            }
        }

        pool.ring.integrity_check();
    }

    #[test]
    fn sixty_four_nodes_per_slab() {
        let mut pool = SlabPool64::new(1, 0).unwrap();

        let nodes = rent_many(&mut pool, 64);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.bitmaps(), vec![u64::FULL]);

        let extra = pool.rent();
        assert_eq!(pool.slabs(), 2);

        for node in nodes.into_iter().chain([extra]) {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn vacant_slab_goes_to_reserve_while_room() {
        let mut pool = SlabPool32::new(8, 1).unwrap();

        let first = rent_many(&mut pool, 32);
        let second = rent_many(&mut pool, 1);
        assert_eq!(pool.slabs(), 2);

        for node in first {
            unsafe {
                pool.release(node);
            }
        }

        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);

        for node in second {
            unsafe {
                pool.release(node);
            }
        }

        pool.ring.integrity_check();
    }

    #[test]
    fn vacant_slab_is_freed_when_reserve_full() {
        let mut pool = SlabPool32::new(8, 0).unwrap();

        let first = rent_many(&mut pool, 32);
        let second = rent_many(&mut pool, 1);

        for node in first {
            unsafe {
                pool.release(node);
            }
        }

        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);

        for node in second {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn current_slab_is_kept_when_vacant() {
        let mut pool = SlabPool32::new(8, 1).unwrap();

        let nodes = rent_many(&mut pool, 40);
        assert_eq!(pool.slabs(), 2);

        let (first_slab, second_slab) = nodes.split_at(32);

        for node in first_slab {
            unsafe {
                pool.release(*node);
            }
        }

        assert_eq!(pool.free_slabs(), 1);
        assert_eq!(pool.slabs(), 1);

        for node in second_slab {
            unsafe {
                pool.release(*node);
            }
        }

        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);
        assert_eq!(pool.bitmaps(), vec![u32::EMPTY]);
        pool.ring.integrity_check();
    }

    #[test]
    fn reserved_slab_is_reused() {
        let mut pool = SlabPool32::new(8, 1).unwrap();

        let first = rent_many(&mut pool, 32);
        let second = rent_many(&mut pool, 1);

        for node in first {
            unsafe {
                pool.release(node);
            }
        }

        assert_eq!(pool.free_slabs(), 1);

        // Fill the current slab; the next rental takes the reserved slab.
        let fill = rent_many(&mut pool, 31);
        assert_eq!(pool.slabs(), 1);

        let recycled = pool.rent();
        assert_eq!(pool.slabs(), 2);
        assert_eq!(pool.free_slabs(), 0);

        for node in second.into_iter().chain(fill).chain([recycled]) {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn ensure_capacity_and_trim_excess() {
        let mut pool = SlabPool64::new(32, 4).unwrap();

        assert_eq!(pool.ensure_capacity(3), 3);
        assert_eq!(pool.ensure_capacity(100), 4);
        assert_eq!(pool.free_slabs(), 4);
        assert_eq!(pool.slabs(), 1);

        assert_eq!(pool.trim_excess_to(2), 2);
        assert_eq!(pool.trim_excess_to(0), 0);
        assert_eq!(pool.trim_excess_to(0), 0);

        pool.ensure_capacity(2);
        assert_eq!(pool.trim_excess(), 0);
        assert_eq!(pool.free_slabs(), 0);
    }

    #[test]
    fn payloads_honor_alignment() {
        #[repr(align(64))]
        struct CacheLine {
            _bytes: [u8; 64],
        }

        let mut pool = SlabPool32::builder()
            .layout_of::<CacheLine>()
            .build()
            .unwrap();

        let nodes = rent_many(&mut pool, 40);

        for node in &nodes {
            assert_eq!(node.as_ptr().addr() % 64, 0);
        }

        for node in nodes {
            unsafe {
                pool.release(node);
            }
        }
    }

    #[test]
    fn zero_length_nodes_work() {
        let mut pool = SlabPool32::new(0, 0).unwrap();

        let nodes = rent_many(&mut pool, 33);
        assert_eq!(pool.slabs(), 2);
        assert!(nodes.iter().all(|node| pool.owns(*node)));

        for node in nodes {
            unsafe {
                pool.release(node);
            }
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn oversized_layout_is_error() {
        let result = SlabPool64::new(usize::MAX / 32, 0);

        assert!(matches!(
            result,
            Err(Error::LayoutTooLarge {
                nodes_per_slab: 64,
                ..
            })
        ));
    }

    #[test]
    fn foreign_pointer_is_not_owned() {
        let pool = SlabPool32::new(8, 0).unwrap();
        let value = Box::new(0_u64);

        assert!(!pool.owns(NonNull::from(&*value).cast()));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn release_to_wrong_pool_panics_in_debug() {
        let mut a = SlabPool32::new(8, 0).unwrap();
        let mut b = SlabPool32::new(8, 0).unwrap();

        let node = a.rent();

        unsafe {
            b.release(node);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn double_release_panics_in_debug() {
        let mut pool = SlabPool32::new(8, 0).unwrap();

        let _keep = pool.rent();
        let node = pool.rent();

        unsafe {
            pool.release(node);
            pool.release(node);
        }
    }
}
