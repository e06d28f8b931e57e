use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory;
use crate::metrics::{SLABS_ALLOCATED, SLABS_FREED, SLABS_RECYCLED, SLABS_RESERVED, observe_once};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
pub(crate) fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Ring links at the start of every slab header.
///
/// Slab headers are `#[repr(C)]` with this as their first field, so a pointer to the header is
/// also a pointer to its links and vice versa.
///
/// While a slab sits in a pool's reserve, `next` links to the next reserved slab instead (or to
/// the slab itself if it is the last one) and `previous` is meaningless.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct SlabLinks {
    next: NonNull<SlabLinks>,
    previous: NonNull<SlabLinks>,
}

/// Describes one flavor of slab: how big it is, how to prepare a fresh one and how to tell
/// whether it has room for another node.
pub(crate) trait SlabKind {
    /// Layout of a whole slab, header included.
    fn slab_layout(&self) -> Layout;

    /// Prepares a freshly allocated slab so that all of its nodes are vacant.
    ///
    /// The ring links are written by the ring itself and must be left alone.
    ///
    /// # Safety
    ///
    /// `slab` must point to an allocation of `slab_layout()` that nothing else references.
    unsafe fn initialize(&self, slab: NonNull<SlabLinks>);

    /// Whether every node of the slab is rented.
    ///
    /// # Safety
    ///
    /// `slab` must point to a slab of this kind that was initialized by `initialize()`.
    unsafe fn is_full(&self, slab: NonNull<SlabLinks>) -> bool;
}

/// The slab bookkeeping shared by every slab pool in this crate.
///
/// In-use slabs form an intrusive circular doubly linked ring. One of them is the current slab,
/// which rentals are served from. Slabs that empty out are either kept in a bounded reserve for
/// fast reuse or handed back to the system allocator.
///
/// The ring always contains at least one slab. The current slab is never evicted, even when it
/// is completely vacant.
#[derive(Debug)]
pub(crate) struct SlabRing<K: SlabKind> {
    kind: K,

    /// The slab that rentals are served from.
    current: NonNull<SlabLinks>,

    /// Head of the singly linked list of reserved slabs, threaded through `SlabLinks::next`.
    reserve: Option<NonNull<SlabLinks>>,

    /// Number of slabs in the ring.
    slabs: usize,

    /// Number of slabs in the reserve.
    free_slabs: usize,

    max_free_slabs: usize,
}

impl<K: SlabKind> SlabRing<K> {
    /// Creates a ring holding one freshly allocated slab.
    #[must_use]
    pub(crate) fn new(kind: K, max_free_slabs: usize) -> Self {
        let current = Self::allocate_slab(&kind);

        // SAFETY: We just allocated the slab and nothing else references it yet.
        unsafe {
            current.write(SlabLinks {
                next: current,
                previous: current,
            });
        }

        Self {
            kind,
            current,
            reserve: None,
            slabs: 1,
            free_slabs: 0,
            max_free_slabs,
        }
    }

    #[must_use]
    pub(crate) fn kind(&self) -> &K {
        &self.kind
    }

    #[must_use]
    pub(crate) fn slabs(&self) -> usize {
        self.slabs
    }

    #[must_use]
    pub(crate) fn free_slabs(&self) -> usize {
        self.free_slabs
    }

    #[must_use]
    pub(crate) fn max_free_slabs(&self) -> usize {
        self.max_free_slabs
    }

    #[must_use]
    pub(crate) fn current(&self) -> NonNull<SlabLinks> {
        self.current
    }

    /// Returns a slab with at least one vacant node and makes it the current slab.
    ///
    /// If the current slab is full, the next slab in the ring is tried. If that one is full too,
    /// a slab is taken from the reserve (or allocated if the reserve is empty) and spliced into
    /// the ring immediately before the old current slab.
    #[must_use]
    pub(crate) fn vacant_slab(&mut self) -> NonNull<SlabLinks> {
        let current = self.current;

        // SAFETY: The current slab is always a live, initialized slab of our kind.
        if !unsafe { self.kind.is_full(current) } {
            return current;
        }

        // SAFETY: Ring links always point to live slabs in the ring.
        let next = unsafe { current.as_ref().next };

        // SAFETY: Ring links always point to live, initialized slabs of our kind.
        let slab = if unsafe { self.kind.is_full(next) } {
            let fresh = match self.take_reserved() {
                Some(slab) => {
                    observe_once(&SLABS_RECYCLED);
                    slab
                }
                None => Self::allocate_slab(&self.kind),
            };

            // SAFETY: The fresh slab is not part of the ring and the anchor is.
            unsafe {
                self.link_before(fresh, current);
            }

            // Cannot overflow because every slab occupies memory.
            self.slabs = self.slabs.wrapping_add(1);

            fresh
        } else {
            next
        };

        self.current = slab;
        slab
    }

    /// Takes a slab that just became completely vacant out of service, unless it is the
    /// current slab.
    ///
    /// The slab goes into the reserve if the reserve has room, otherwise it is freed.
    ///
    /// # Safety
    ///
    /// `slab` must be a slab of this ring with every node vacant.
    pub(crate) unsafe fn retire(&mut self, slab: NonNull<SlabLinks>) {
        if slab == self.current {
            return;
        }

        // SAFETY: Forwarding guarantee from the caller that the slab is in the ring.
        unsafe {
            Self::unlink(slab);
        }

        // Cannot underflow because the ring holds at least the current slab and this one.
        self.slabs = self.slabs.wrapping_sub(1);

        if self.free_slabs < self.max_free_slabs {
            self.push_reserved(slab);
            observe_once(&SLABS_RESERVED);
        } else {
            // SAFETY: The slab was unlinked above, so nothing in the pool references it anymore.
            unsafe {
                self.free_slab(slab);
            }
        }
    }

    /// Grows the reserve to `min(capacity, max_free_slabs)` slabs and returns the reserve size.
    pub(crate) fn ensure_capacity(&mut self, capacity: usize) -> usize {
        let target = capacity.min(self.max_free_slabs);

        while self.free_slabs < target {
            let slab = Self::allocate_slab(&self.kind);
            self.push_reserved(slab);
        }

        self.free_slabs
    }

    /// Frees reserved slabs until at most `capacity` remain and returns the reserve size.
    pub(crate) fn trim_excess_to(&mut self, capacity: usize) -> usize {
        while self.free_slabs > capacity {
            let slab = self
                .take_reserved()
                .expect("free_slabs is non-zero so the reserve cannot be empty");

            // SAFETY: The slab was removed from the reserve, so nothing references it anymore.
            unsafe {
                self.free_slab(slab);
            }
        }

        self.free_slabs
    }

    /// Whether `ptr` points into the node area of one of the slabs in the ring.
    ///
    /// A payload never starts at the slab base (the header is there), while a zero-sized payload
    /// of the last node may sit exactly at the slab end, hence the half-open range `(base, end]`.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let size = self.kind.slab_layout().size();
        let addr = ptr.as_ptr().addr();

        self.iter().any(|slab| {
            let base = slab.as_ptr().addr();
            // Cannot overflow because the slab occupies this range of memory.
            addr > base && addr <= base.wrapping_add(size)
        })
    }

    /// Iterates over the slabs in the ring, starting from the current slab.
    pub(crate) fn iter(&self) -> RingIter<'_> {
        RingIter {
            first: self.current,
            next: Some(self.current),
            _ring: PhantomData,
        }
    }

    fn allocate_slab(kind: &K) -> NonNull<SlabLinks> {
        let slab = memory::allocate(kind.slab_layout()).cast::<SlabLinks>();

        // SAFETY: We just allocated the slab with the kind's layout and nothing references it.
        unsafe {
            kind.initialize(slab);
        }

        observe_once(&SLABS_ALLOCATED);
        slab
    }

    /// # Safety
    ///
    /// The slab must have been allocated by `allocate_slab()` and must not be referenced by the
    /// ring or the reserve anymore.
    unsafe fn free_slab(&self, slab: NonNull<SlabLinks>) {
        // SAFETY: Forwarding guarantee from the caller; the layout is the one we allocated with.
        unsafe {
            memory::deallocate(slab.cast(), self.kind.slab_layout());
        }

        observe_once(&SLABS_FREED);
    }

    fn push_reserved(&mut self, slab: NonNull<SlabLinks>) {
        // The last reserved slab links to itself.
        let next = self.reserve.unwrap_or(slab);

        // SAFETY: The slab is live and out of the ring, so we have exclusive access to its links.
        unsafe {
            (*slab.as_ptr()).next = next;
        }

        self.reserve = Some(slab);

        // Cannot overflow because every slab occupies memory.
        self.free_slabs = self.free_slabs.wrapping_add(1);
    }

    fn take_reserved(&mut self) -> Option<NonNull<SlabLinks>> {
        let slab = self.reserve?;

        // SAFETY: Reserved slabs are live and only referenced by the reserve chain.
        let next = unsafe { slab.as_ref().next };

        self.reserve = if next == slab { None } else { Some(next) };

        // Cannot underflow because we just took a slab out of a non-empty reserve.
        self.free_slabs = self.free_slabs.wrapping_sub(1);

        Some(slab)
    }

    /// # Safety
    ///
    /// `slab` must be live and outside the ring; `anchor` must be in the ring.
    unsafe fn link_before(&mut self, slab: NonNull<SlabLinks>, anchor: NonNull<SlabLinks>) {
        // SAFETY: The anchor is in the ring so its links are valid.
        let previous = unsafe { anchor.as_ref().previous };

        // SAFETY: The slab is outside the ring, so we may overwrite its links.
        unsafe {
            slab.write(SlabLinks {
                next: anchor,
                previous,
            });
        }

        // SAFETY: Both are live slabs of the ring and we hold no references into them.
        // `previous` may be the anchor itself if it was alone in the ring, which is fine
        // because we only write through raw pointers.
        unsafe {
            (*previous.as_ptr()).next = slab;
        }

        // SAFETY: As above.
        unsafe {
            (*anchor.as_ptr()).previous = slab;
        }
    }

    /// # Safety
    ///
    /// `slab` must be in the ring and must not be the only slab in it.
    unsafe fn unlink(slab: NonNull<SlabLinks>) {
        // SAFETY: The slab is in the ring so its links are valid.
        let SlabLinks { next, previous } = unsafe { slab.read() };

        // SAFETY: Neighbors in the ring are live slabs and we hold no references into them.
        unsafe {
            (*previous.as_ptr()).next = next;
        }

        // SAFETY: As above.
        unsafe {
            (*next.as_ptr()).previous = previous;
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    /// Verifies the ring and reserve bookkeeping.
    ///
    /// This method is only available in debug builds and is used for testing and validation.
    pub(crate) fn integrity_check(&self) {
        let mut observed_slabs: usize = 0;

        for slab in self.iter() {
            // SAFETY: Ring links always point to live slabs in the ring.
            let next = unsafe { slab.as_ref().next };
            // SAFETY: As above.
            let next_previous = unsafe { next.as_ref().previous };

            assert_eq!(
                next_previous, slab,
                "ring slab {slab:?} is not the predecessor of its successor {next:?}"
            );

            observed_slabs = observed_slabs.wrapping_add(1);
        }

        assert_eq!(
            observed_slabs, self.slabs,
            "ring holds {observed_slabs} slabs but the pool believes it holds {}",
            self.slabs
        );

        let mut observed_free_slabs: usize = 0;
        let mut cursor = self.reserve;

        while let Some(slab) = cursor {
            observed_free_slabs = observed_free_slabs.wrapping_add(1);

            // SAFETY: Reserved slabs are live and linked through their next field.
            let next = unsafe { slab.as_ref().next };
            cursor = if next == slab { None } else { Some(next) };
        }

        assert_eq!(
            observed_free_slabs, self.free_slabs,
            "reserve holds {observed_free_slabs} slabs but the pool believes it holds {}",
            self.free_slabs
        );

        assert!(
            self.free_slabs <= self.max_free_slabs,
            "reserve of {} slabs exceeds the bound of {}",
            self.free_slabs,
            self.max_free_slabs
        );
    }
}

impl<K: SlabKind> Drop for SlabRing<K> {
    fn drop(&mut self) {
        let first = self.current;

        // SAFETY: Ring links always point to live slabs in the ring.
        let mut slab = unsafe { first.as_ref().next };

        while slab != first {
            // SAFETY: As above.
            let next = unsafe { slab.as_ref().next };

            // SAFETY: We are tearing down the ring; nothing will look at this slab again.
            unsafe {
                self.free_slab(slab);
            }

            slab = next;
        }

        // SAFETY: The last slab of the ring, which nothing will look at again.
        unsafe {
            self.free_slab(first);
        }

        while let Some(slab) = self.take_reserved() {
            // SAFETY: The slab was removed from the reserve, so nothing references it anymore.
            unsafe {
                self.free_slab(slab);
            }
        }
    }
}

// SAFETY: The ring exclusively owns every slab it points to and does not rely on thread-local
// state for them, so it can move between threads together with its kind descriptor.
unsafe impl<K: SlabKind + Send> Send for SlabRing<K> {}

/// Iterator over the slabs of a [`SlabRing`], starting from the current slab.
#[derive(Debug)]
pub(crate) struct RingIter<'a> {
    first: NonNull<SlabLinks>,
    next: Option<NonNull<SlabLinks>>,
    _ring: PhantomData<&'a ()>,
}

impl Iterator for RingIter<'_> {
    type Item = NonNull<SlabLinks>;

    fn next(&mut self) -> Option<Self::Item> {
        let slab = self.next?;

        // SAFETY: The iterator borrows the ring, so its links stay valid while we walk them.
        let following = unsafe { slab.as_ref().next };

        self.next = if following == self.first {
            None
        } else {
            Some(following)
        };

        Some(slab)
    }
}

#[cfg(test)]
#[expect(
    clippy::undocumented_unsafe_blocks,
    reason = "test code, we assume safety is considered"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// A slab kind with a single node, tracked by a flag right after the links.
    #[derive(Debug)]
    struct SingleNodeKind {
        initialized: Rc<Cell<usize>>,
    }

    #[repr(C)]
    #[expect(dead_code, reason = "the links are accessed by the ring through the slab pointer")]
    struct SingleNodeSlab {
        links: SlabLinks,
        occupied: bool,
    }

    impl SlabKind for SingleNodeKind {
        fn slab_layout(&self) -> Layout {
            Layout::new::<SingleNodeSlab>()
        }

        unsafe fn initialize(&self, slab: NonNull<SlabLinks>) {
            let slab = slab.cast::<SingleNodeSlab>();
            unsafe {
                (*slab.as_ptr()).occupied = false;
            }
            self.initialized.set(self.initialized.get() + 1);
        }

        unsafe fn is_full(&self, slab: NonNull<SlabLinks>) -> bool {
            unsafe { (*slab.cast::<SingleNodeSlab>().as_ptr()).occupied }
        }
    }

    fn occupy(slab: NonNull<SlabLinks>, occupied: bool) {
        unsafe {
            (*slab.cast::<SingleNodeSlab>().as_ptr()).occupied = occupied;
        }
    }

    fn ring(max_free_slabs: usize) -> (SlabRing<SingleNodeKind>, Rc<Cell<usize>>) {
        let initialized = Rc::new(Cell::new(0));
        let kind = SingleNodeKind {
            initialized: Rc::clone(&initialized),
        };
        (SlabRing::new(kind, max_free_slabs), initialized)
    }

    #[test]
    fn new_ring_holds_one_slab() {
        let (ring, initialized) = ring(2);

        assert_eq!(ring.slabs(), 1);
        assert_eq!(ring.free_slabs(), 0);
        assert_eq!(ring.max_free_slabs(), 2);
        assert_eq!(initialized.get(), 1);
        assert_eq!(ring.iter().count(), 1);
        ring.integrity_check();
    }

    #[test]
    fn vacant_slab_returns_current_while_not_full() {
        let (mut ring, _) = ring(0);

        let first = ring.current();
        assert_eq!(ring.vacant_slab(), first);
        assert_eq!(ring.slabs(), 1);
    }

    #[test]
    fn full_ring_grows_before_current() {
        let (mut ring, _) = ring(0);

        let first = ring.current();
        occupy(first, true);

        let second = ring.vacant_slab();
        assert_ne!(second, first);
        assert_eq!(ring.current(), second);
        assert_eq!(ring.slabs(), 2);

        occupy(second, true);
        let third = ring.vacant_slab();
        assert_eq!(ring.slabs(), 3);

        // The new slab is spliced in right before the old current slab.
        assert_eq!(unsafe { third.as_ref().next }, second);
        ring.integrity_check();
    }

    #[test]
    fn vacant_slab_advances_to_next_with_room() {
        let (mut ring, _) = ring(0);

        let first = ring.current();
        occupy(first, true);
        let second = ring.vacant_slab();

        // Free up the first slab, fill the second; the next rental moves back to the first.
        occupy(first, false);
        occupy(second, true);

        assert_eq!(ring.vacant_slab(), first);
        assert_eq!(ring.slabs(), 2);
    }

    #[test]
    fn retire_current_slab_is_ignored() {
        let (mut ring, _) = ring(1);

        let current = ring.current();
        unsafe {
            ring.retire(current);
        }

        assert_eq!(ring.slabs(), 1);
        assert_eq!(ring.free_slabs(), 0);
    }

    #[test]
    fn retire_moves_to_reserve_then_frees() {
        let (mut ring, initialized) = ring(1);

        let first = ring.current();
        occupy(first, true);
        let second = ring.vacant_slab();
        occupy(second, true);
        let third = ring.vacant_slab();
        assert_eq!(ring.slabs(), 3);

        occupy(first, false);
        unsafe {
            ring.retire(first);
        }
        assert_eq!(ring.slabs(), 2);
        assert_eq!(ring.free_slabs(), 1);

        occupy(second, false);
        unsafe {
            ring.retire(second);
        }
        assert_eq!(ring.slabs(), 1);
        assert_eq!(ring.free_slabs(), 1);
        assert_eq!(ring.current(), third);
        ring.integrity_check();

        // The next growth reuses the reserved slab instead of allocating.
        occupy(third, true);
        let recycled = ring.vacant_slab();
        assert_eq!(recycled, first);
        assert_eq!(ring.free_slabs(), 0);
        assert_eq!(initialized.get(), 3);
        ring.integrity_check();
    }

    #[test]
    fn ensure_capacity_is_bounded() {
        let (mut ring, initialized) = ring(3);

        assert_eq!(ring.ensure_capacity(2), 2);
        assert_eq!(ring.ensure_capacity(10), 3);
        assert_eq!(ring.ensure_capacity(1), 3);
        assert_eq!(initialized.get(), 4);
        ring.integrity_check();
    }

    #[test]
    fn trim_excess_to_is_idempotent() {
        let (mut ring, _) = ring(4);

        ring.ensure_capacity(4);
        assert_eq!(ring.trim_excess_to(1), 1);
        assert_eq!(ring.trim_excess_to(0), 0);
        assert_eq!(ring.trim_excess_to(0), 0);
        ring.integrity_check();
    }

    #[test]
    fn contains_recognizes_ring_memory() {
        let (mut ring, _) = ring(0);

        let first = ring.current();
        occupy(first, true);
        let second = ring.vacant_slab();

        let inside = unsafe { second.cast::<u8>().byte_add(size_of::<SlabLinks>()) };
        assert!(ring.contains(inside));
        assert!(!ring.contains(second.cast()));

        let outside = Box::new(0_u64);
        assert!(!ring.contains(NonNull::from(&*outside).cast()));
    }

    #[test]
    fn generated_pool_ids_are_unique() {
        let a = generate_pool_id();
        let b = generate_pool_id();
        assert_ne!(a, b);
    }
}
