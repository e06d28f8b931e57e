use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::metrics::{ARRAY_CACHE_HITS, ARRAY_CACHE_MISSES, observe_once};
use crate::ring::generate_pool_id;
use crate::spin_lock::SpinLock;
use crate::{ArrayPoolBuilder, BitScan, Error, Result, SlabPool};

/// The largest array length an [`ArrayPool`] can be configured to serve.
pub const MAX_ARRAY_LENGTH: usize = 1 << 30;

/// Length of the arrays in bucket 0. Every following bucket doubles it.
const MIN_ARRAY_LENGTH: usize = 16;

/// Bucket slab pools size their slabs to roughly this many bytes.
const TARGET_SLAB_BYTES: usize = 64 * 1024;

/// Upper bound on nodes per bucket slab, reached by buckets of tiny arrays.
const MAX_NODES_PER_SLAB: usize = 256;

/// Maps a requested array length to the index of the bucket serving it.
///
/// Bucket `i` holds arrays of `16 << i` elements, so lengths up to 16 map to bucket 0, 17 to 32
/// map to bucket 1 and so on. The mapping is monotonic.
///
/// # Examples
///
/// ```
/// use slab_pool::select_bucket_index;
///
/// assert_eq!(select_bucket_index(1), 0);
/// assert_eq!(select_bucket_index(16), 0);
/// assert_eq!(select_bucket_index(17), 1);
/// assert_eq!(select_bucket_index(32), 1);
/// assert_eq!(select_bucket_index(33), 2);
/// ```
#[must_use]
#[inline]
pub fn select_bucket_index(length: usize) -> usize {
    // OR-ing in 15 puts the result at least at log2(15) == 3, so the subtraction cannot
    // underflow. Saturating at zero keeps length 0 in bucket 0.
    ((length.saturating_sub(1) | 15).log2() as usize).wrapping_sub(3)
}

fn bucket_length_of(index: usize) -> usize {
    MIN_ARRAY_LENGTH << index
}

/// An array rented from an [`ArrayPool`].
///
/// The length is always a power of two of at least 16 and at least the length that was asked
/// for. The contents are uninitialized when the array is rented and are not cleared when it is
/// released, so they may hold values written by a previous renter.
///
/// The array does not borrow the pool. Return it with [`ArrayPool::release()`]; an array that is
/// dropped instead stays allocated until the pool itself is dropped.
pub struct PooledArray<T> {
    ptr: NonNull<T>,
    len: usize,
    pool_id: u64,
}

impl<T> PooledArray<T> {
    /// Pointer to the first element.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Number of elements in the array.
    #[must_use]
    #[inline]
    #[expect(clippy::len_without_is_empty, reason = "pooled arrays are never empty")]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Views the array as a slice of possibly uninitialized elements.
    ///
    /// # Safety
    ///
    /// The pool the array was rented from must still be alive.
    #[must_use]
    pub unsafe fn as_uninit_slice(&self) -> &[MaybeUninit<T>] {
        // SAFETY: The caller guarantees the pool, and with it the memory, is alive. The memory
        // holds `len` elements of T and MaybeUninit<T> has no validity requirements.
        unsafe { std::slice::from_raw_parts(self.ptr.cast().as_ptr(), self.len) }
    }

    /// Views the array as a mutable slice of possibly uninitialized elements.
    ///
    /// # Safety
    ///
    /// The pool the array was rented from must still be alive.
    #[must_use]
    pub unsafe fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<T>] {
        // SAFETY: See as_uninit_slice(). We hold the only handle to the array.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.cast().as_ptr(), self.len) }
    }
}

impl<T> fmt::Debug for PooledArray<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledArray")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}

// SAFETY: The array is a unique handle to memory holding T values, so it can move to another
// thread whenever T can.
unsafe impl<T: Send> Send for PooledArray<T> {}

// SAFETY: Shared access to the handle only yields shared access to the T values.
unsafe impl<T: Sync> Sync for PooledArray<T> {}

/// State of one size class, guarded by the bucket's spin lock.
struct Bucket {
    /// Recently released arrays, reused last-in first-out before touching the slab pool.
    cache: Vec<NonNull<u8>>,

    /// Created on first use so that unused size classes cost no memory.
    slabs: Option<SlabPool>,
}

// SAFETY: The cached pointers refer to nodes of the bucket's own slab pool, which is Send,
// and are only touched while the bucket lock is held.
unsafe impl Send for Bucket {}

/// A thread-safe pool of arrays of `T`, sorted into power-of-two size classes.
///
/// Each size class ("bucket") is backed by its own [`SlabPool`] whose nodes fit exactly one array
/// of that class, plus a small last-in first-out cache of recently released arrays. Each bucket
/// is guarded by its own spin lock, so operations on different size classes never contend.
///
/// # Examples
///
/// ```
/// use slab_pool::ArrayPool;
///
/// let pool = ArrayPool::<u32>::builder().max_length(1024).build().unwrap();
///
/// let mut array = pool.rent(100);
/// assert_eq!(array.len(), 128);
///
/// // SAFETY: The pool is alive.
/// for slot in unsafe { array.as_uninit_slice_mut() } {
///     slot.write(7);
/// }
///
/// pool.release(array);
///
/// assert!(pool.try_rent(4096).is_err());
/// ```
pub struct ArrayPool<T: Copy> {
    buckets: Box<[SpinLock<Bucket>]>,

    /// Maximum number of arrays cached per bucket.
    cache_size: usize,

    /// Reserve bound passed to every bucket slab pool.
    max_free_slabs: usize,

    pool_id: u64,

    /// Released arrays carry their `T` values to whichever thread rents them next.
    _element: PhantomData<T>,
}

impl<T: Copy> ArrayPool<T> {
    /// Creates a builder for configuring and constructing an [`ArrayPool`].
    #[inline]
    pub fn builder() -> ArrayPoolBuilder<T> {
        ArrayPoolBuilder::new()
    }

    pub(crate) fn new_inner(
        max_length: usize,
        cache_size: usize,
        max_free_slabs: usize,
    ) -> Result<Self> {
        if max_length > MAX_ARRAY_LENGTH {
            return Err(Error::MaxLengthOutOfRange { max_length });
        }

        let bucket_count = select_bucket_index(max_length).wrapping_add(1);

        // Smaller buckets never need larger slabs than the largest one, so once its slab layout
        // checks out the lazily created bucket pools cannot fail.
        let (layout, nodes_per_slab) = Self::bucket_slab_settings(bucket_count.wrapping_sub(1))?;
        SlabPool::check_layout(layout, nodes_per_slab)?;

        // Caches grow on release, up to `cache_size`.
        let buckets = (0..bucket_count)
            .map(|_| {
                SpinLock::new(Bucket {
                    cache: Vec::new(),
                    slabs: None,
                })
            })
            .collect();

        Ok(Self {
            buckets,
            cache_size,
            max_free_slabs,
            pool_id: generate_pool_id(),
            _element: PhantomData,
        })
    }

    /// Rents an array of at least `min_length` elements.
    ///
    /// # Panics
    ///
    /// Panics if `min_length` exceeds [`max_length()`](Self::max_length). Use
    /// [`try_rent()`](Self::try_rent) to handle that case without panicking.
    #[must_use]
    pub fn rent(&self, min_length: usize) -> PooledArray<T> {
        self.try_rent(min_length)
            .unwrap_or_else(|error| panic!("{error}"))
    }

    /// Rents an array of at least `min_length` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthOutOfRange`] if `min_length` exceeds
    /// [`max_length()`](Self::max_length).
    pub fn try_rent(&self, min_length: usize) -> Result<PooledArray<T>> {
        let index = select_bucket_index(min_length);

        let bucket = self.buckets.get(index).ok_or(Error::LengthOutOfRange {
            length: min_length,
            max_length: self.max_length(),
        })?;

        let mut bucket = bucket.lock();

        let ptr = if let Some(ptr) = bucket.cache.pop() {
            observe_once(&ARRAY_CACHE_HITS);
            ptr
        } else {
            observe_once(&ARRAY_CACHE_MISSES);

            if bucket.slabs.is_none() {
                bucket.slabs = Some(self.create_bucket_slabs(index)?);
            }

            bucket
                .slabs
                .as_mut()
                .expect("the bucket slab pool was created above")
                .rent()
        };

        Ok(PooledArray {
            ptr: ptr.cast(),
            len: bucket_length_of(index),
            pool_id: self.pool_id,
        })
    }

    /// Returns an array to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the array was not rented from this pool. Use
    /// [`try_release()`](Self::try_release) to handle that case without panicking.
    pub fn release(&self, array: PooledArray<T>) {
        self.try_release(array)
            .unwrap_or_else(|error| panic!("{error}"));
    }

    /// Returns an array to the pool.
    ///
    /// On error the array is dropped without being returned, which leaves its memory allocated
    /// until the pool that issued it is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArrayLength`] if the array length is not a power of two of at
    /// least 16, [`Error::LengthOutOfRange`] if it is larger than
    /// [`max_length()`](Self::max_length) and [`Error::ForeignArray`] if the array was rented
    /// from a different pool.
    pub fn try_release(&self, array: PooledArray<T>) -> Result<()> {
        let length = array.len;

        if !length.is_power_of_two() || length < MIN_ARRAY_LENGTH {
            return Err(Error::InvalidArrayLength { length });
        }

        let index = select_bucket_index(length);

        let bucket = self.buckets.get(index).ok_or(Error::LengthOutOfRange {
            length,
            max_length: self.max_length(),
        })?;

        if array.pool_id != self.pool_id {
            return Err(Error::ForeignArray {
                array_pool_id: array.pool_id,
                pool_id: self.pool_id,
            });
        }

        let ptr = array.ptr.cast::<u8>();
        let mut bucket = bucket.lock();

        if bucket.cache.len() < self.cache_size {
            bucket.cache.push(ptr);
            return Ok(());
        }

        let slabs = bucket
            .slabs
            .as_mut()
            .expect("an array of this bucket was rented, so its slab pool exists");

        // SAFETY: The pool ID matches, so the array was issued by this pool, and arrays of this
        // length only come from this bucket's slab pool. The array was moved into this call, so
        // it cannot be released again.
        unsafe {
            slabs.release(ptr);
        }

        Ok(())
    }

    /// Moves every cached array back into its bucket's slab pool and frees the vacant slabs held
    /// in reserve by every bucket.
    pub fn trim_excess(&self) {
        for bucket in self.buckets.iter() {
            let mut bucket = bucket.lock();
            let Bucket { cache, slabs } = &mut *bucket;

            let Some(slabs) = slabs else {
                continue;
            };

            for ptr in cache.drain(..) {
                // SAFETY: Cached pointers are rented nodes of this slab pool that no caller
                // holds anymore.
                unsafe {
                    slabs.release(ptr);
                }
            }

            slabs.trim_excess();
        }
    }

    /// The largest array length this pool serves.
    #[must_use]
    pub fn max_length(&self) -> usize {
        bucket_length_of(self.bucket_count().wrapping_sub(1))
    }

    /// Number of size classes.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Array length of the bucket at `index`, or `None` if there is no such bucket.
    #[must_use]
    pub fn bucket_length(&self, index: usize) -> Option<usize> {
        (index < self.bucket_count()).then(|| bucket_length_of(index))
    }

    /// Maximum number of released arrays each bucket keeps for reuse.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Node layout and nodes per slab of the slab pool behind the bucket at `index`.
    fn bucket_slab_settings(index: usize) -> Result<(Layout, NonZero<usize>)> {
        let length = bucket_length_of(index);

        let layout = Layout::array::<T>(length).map_err(|_layout_error| Error::LayoutTooLarge {
            node_size: size_of::<T>().saturating_mul(length),
            nodes_per_slab: 1,
        })?;

        let nodes_per_slab = TARGET_SLAB_BYTES
            .checked_div(layout.size())
            .unwrap_or(MAX_NODES_PER_SLAB)
            .clamp(1, MAX_NODES_PER_SLAB);

        Ok((
            layout,
            NonZero::new(nodes_per_slab).expect("clamped to at least one node per slab"),
        ))
    }

    fn create_bucket_slabs(&self, index: usize) -> Result<SlabPool> {
        let (layout, nodes_per_slab) = Self::bucket_slab_settings(index)?;

        SlabPool::builder()
            .layout(layout)
            .nodes_per_slab(nodes_per_slab)
            .max_free_slabs(self.max_free_slabs)
            .build()
    }

    /// Number of arrays in the cache of the bucket at `index`.
    #[cfg(test)]
    fn cached(&self, index: usize) -> usize {
        self.buckets[index].lock().cache.len()
    }

    /// Slabs in service and in reserve for the bucket at `index`.
    #[cfg(test)]
    fn bucket_slabs(&self, index: usize) -> Option<(usize, usize)> {
        self.buckets[index]
            .lock()
            .slabs
            .as_ref()
            .map(|slabs| (slabs.slabs(), slabs.free_slabs()))
    }
}

impl<T: Copy> fmt::Debug for ArrayPool<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPool")
            .field("bucket_count", &self.bucket_count())
            .field("max_length", &self.max_length())
            .field("cache_size", &self.cache_size)
            .field("max_free_slabs", &self.max_free_slabs)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}

#[cfg(test)]
#[expect(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code, we assume safety is considered"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ArrayPool<u64>: Send, Sync);
    assert_impl_all!(PooledArray<u64>: Send, Sync);
    assert_not_impl_any!(PooledArray<*const u8>: Send, Sync);
    assert_not_impl_any!(ArrayPool<*const u8>: Send, Sync);
    assert_not_impl_any!(ArrayPool<&'static Cell<u8>>: Send, Sync);

    fn pool(max_length: usize, cache_size: usize) -> ArrayPool<u64> {
        ArrayPool::builder()
            .max_length(max_length)
            .cache_size(cache_size)
            .build()
            .unwrap()
    }

    #[test]
    fn bucket_index_mapping() {
        assert_eq!(select_bucket_index(0), 0);
        assert_eq!(select_bucket_index(1), 0);
        assert_eq!(select_bucket_index(16), 0);
        assert_eq!(select_bucket_index(17), 1);
        assert_eq!(select_bucket_index(32), 1);
        assert_eq!(select_bucket_index(33), 2);
        assert_eq!(select_bucket_index(1024), 6);
        assert_eq!(select_bucket_index(MAX_ARRAY_LENGTH), 26);
    }

    #[test]
    fn bucket_index_is_monotonic() {
        let mut previous = 0;

        for length in 0..5000 {
            let index = select_bucket_index(length);
            assert!(index >= previous, "bucket index decreased at length {length}");
            assert!(bucket_length_of(index) >= length);
            previous = index;
        }
    }

    #[test]
    fn buckets_cover_configured_range() {
        let pool = pool(1000, 4);

        assert_eq!(pool.bucket_count(), 7);
        assert_eq!(pool.max_length(), 1024);
        assert_eq!(pool.bucket_length(0), Some(16));
        assert_eq!(pool.bucket_length(6), Some(1024));
        assert_eq!(pool.bucket_length(7), None);
    }

    #[test]
    fn rent_rounds_up_to_bucket_length() {
        let pool = pool(1024, 4);

        for (requested, expected) in [(0, 16), (1, 16), (16, 16), (17, 32), (500, 512)] {
            let array = pool.rent(requested);
            assert_eq!(array.len(), expected);
            pool.release(array);
        }
    }

    #[test]
    fn rent_beyond_max_length_is_error() {
        let pool = pool(64, 4);

        assert!(matches!(
            pool.try_rent(65),
            Err(Error::LengthOutOfRange {
                length: 65,
                max_length: 64
            })
        ));
    }

    #[test]
    #[should_panic]
    fn rent_beyond_max_length_panics() {
        let pool = pool(64, 4);
        let _array = pool.rent(65);
    }

    #[test]
    fn max_length_beyond_limit_is_error() {
        let result = ArrayPool::<u8>::builder()
            .max_length(MAX_ARRAY_LENGTH + 1)
            .build();

        assert!(matches!(result, Err(Error::MaxLengthOutOfRange { .. })));
    }

    #[test]
    fn max_length_at_limit_is_accepted() {
        let pool = ArrayPool::<u8>::builder()
            .max_length(MAX_ARRAY_LENGTH)
            .build()
            .unwrap();

        assert_eq!(pool.max_length(), MAX_ARRAY_LENGTH);
        assert_eq!(pool.bucket_count(), 27);
    }

    #[test]
    fn unbounded_cache_size_is_accepted() {
        let pool = pool(64, usize::MAX);
        assert_eq!(pool.cache_size(), usize::MAX);

        let arrays: Vec<_> = (0..100).map(|_| pool.rent(64)).collect();

        for array in arrays {
            pool.release(array);
        }

        assert_eq!(pool.cached(2), 100);

        pool.trim_excess();
        assert_eq!(pool.cached(2), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn node_header_overflow_is_error_at_build() {
        // Sixteen of these fill the address space right up to the limit of a valid layout, with
        // no room left for the node header of the slab pool.
        type Huge = [u8; (isize::MAX as usize) / 16];

        let result = ArrayPool::<Huge>::builder().max_length(16).build();

        assert!(matches!(result, Err(Error::LayoutTooLarge { .. })));
    }

    #[test]
    fn released_array_is_reused_from_cache() {
        let pool = pool(256, 2);

        let array = pool.rent(100);
        let ptr = array.ptr();
        pool.release(array);
        assert_eq!(pool.cached(3), 1);

        let again = pool.rent(128);
        assert_eq!(again.ptr(), ptr);
        assert_eq!(pool.cached(3), 0);

        pool.release(again);
    }

    #[test]
    fn full_cache_falls_through_to_slab_pool() {
        let pool = pool(64, 1);

        let a = pool.rent(64);
        let b = pool.rent(64);

        pool.release(a);
        pool.release(b);

        assert_eq!(pool.cached(2), 1);
        assert_eq!(pool.bucket_slabs(2), Some((1, 0)));
    }

    #[test]
    fn zero_cache_size_always_uses_slab_pool() {
        let pool = pool(64, 0);

        let array = pool.rent(16);
        pool.release(array);

        assert_eq!(pool.cached(0), 0);
    }

    #[test]
    fn rented_arrays_do_not_overlap() {
        let pool = pool(64, 4);

        let mut arrays: Vec<_> = (0..100).map(|i| pool.rent(16 + i % 48)).collect();

        for (i, array) in arrays.iter_mut().enumerate() {
            for slot in unsafe { array.as_uninit_slice_mut() } {
                slot.write(i as u64);
            }
        }

        for (i, array) in arrays.iter().enumerate() {
            for slot in unsafe { array.as_uninit_slice() } {
                assert_eq!(unsafe { slot.assume_init() }, i as u64);
            }
        }

        let unique: HashSet<_> = arrays.iter().map(PooledArray::ptr).collect();
        assert_eq!(unique.len(), 100);

        for array in arrays {
            pool.release(array);
        }
    }

    #[test]
    fn array_payload_is_aligned_for_element() {
        #[derive(Clone, Copy)]
        #[repr(align(32))]
        struct Wide {
            _value: [u8; 32],
        }

        let pool = ArrayPool::<Wide>::builder().max_length(64).build().unwrap();

        let arrays: Vec<_> = (0..10).map(|_| pool.rent(20)).collect();
        assert!(
            arrays
                .iter()
                .all(|array| array.ptr().as_ptr().addr() % 32 == 0)
        );

        for array in arrays {
            pool.release(array);
        }
    }

    #[test]
    fn release_rejects_invalid_length() {
        let pool = pool(64, 4);

        let mut array = pool.rent(16);
        let ptr = array.ptr();
        array.len = 24;

        assert!(matches!(
            pool.try_release(array),
            Err(Error::InvalidArrayLength { length: 24 })
        ));

        // Put the real array back so the test does not leave a rented node behind.
        pool.release(PooledArray {
            ptr,
            len: 16,
            pool_id: pool.pool_id,
        });
    }

    #[test]
    fn release_rejects_length_beyond_range() {
        let small = pool(32, 4);
        let large = pool(1024, 4);

        let array = large.rent(1024);
        let ptr = array.ptr();

        let forged = PooledArray {
            ptr,
            len: 1024,
            pool_id: small.pool_id,
        };

        assert!(matches!(
            small.try_release(forged),
            Err(Error::LengthOutOfRange {
                length: 1024,
                max_length: 32
            })
        ));

        large.release(array);
    }

    #[test]
    fn release_rejects_foreign_array() {
        let a = pool(64, 4);
        let b = pool(64, 4);

        let array = a.rent(16);
        let ptr = array.ptr();

        assert!(matches!(
            b.try_release(array),
            Err(Error::ForeignArray { .. })
        ));

        a.release(PooledArray {
            ptr,
            len: 16,
            pool_id: a.pool_id,
        });
    }

    #[test]
    #[should_panic]
    fn release_foreign_array_panics() {
        let a = pool(64, 4);
        let b = pool(64, 4);

        b.release(a.rent(16));
    }

    #[test]
    fn trim_excess_drains_caches_and_reserves() {
        let pool = ArrayPool::<u64>::builder()
            .max_length(16)
            .cache_size(64)
            .max_free_slabs(4)
            .build()
            .unwrap();

        // Bucket 0 slabs hold 256 arrays of 128 bytes each.
        let arrays: Vec<_> = (0..300).map(|_| pool.rent(16)).collect();
        assert_eq!(pool.bucket_slabs(0), Some((2, 0)));

        for array in arrays {
            pool.release(array);
        }

        assert_eq!(pool.cached(0), 64);

        pool.trim_excess();

        assert_eq!(pool.cached(0), 0);
        assert_eq!(pool.bucket_slabs(0), Some((1, 0)));
    }

    #[test]
    fn unused_buckets_allocate_nothing() {
        let pool = pool(1 << 20, 4);

        assert!((0..pool.bucket_count()).all(|index| pool.bucket_slabs(index).is_none()));

        let array = pool.rent(1 << 20);
        assert!(pool.bucket_slabs(16).is_some());
        assert!(pool.bucket_slabs(15).is_none());

        pool.release(array);
    }

    #[test]
    fn zero_sized_elements() {
        let pool = ArrayPool::<()>::builder().max_length(64).build().unwrap();

        let arrays: Vec<_> = (0..10).map(|_| pool.rent(40)).collect();
        assert!(arrays.iter().all(|array| array.len() == 64));

        for array in arrays {
            pool.release(array);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn concurrent_rent_and_release() {
        const THREADS: usize = 4;
        const ITERATIONS: usize = 2_000;

        let pool = pool(256, 8);
        let barrier = Barrier::new(THREADS);

        thread::scope(|scope| {
            for thread_index in 0..THREADS {
                let pool = &pool;
                let barrier = &barrier;

                scope.spawn(move || {
                    barrier.wait();

                    for i in 0..ITERATIONS {
                        let length = 1 + (thread_index * 31 + i) % 256;
                        let mut array = pool.rent(length);
                        let marker = (thread_index * ITERATIONS + i) as u64;

                        for slot in unsafe { array.as_uninit_slice_mut() } {
                            slot.write(marker);
                        }

                        // Another thread writing into the same array would change the values.
                        for slot in unsafe { array.as_uninit_slice() } {
                            assert_eq!(unsafe { slot.assume_init() }, marker);
                        }

                        pool.release(array);
                    }
                });
            }
        });

        pool.trim_excess();
    }
}
