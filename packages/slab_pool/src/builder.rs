use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{ArrayPool, BitmapSlabPool, Error, Result, SlabBitmap, SlabPool};

/// Vacant slabs a pool keeps in reserve unless configured otherwise.
const DEFAULT_MAX_FREE_SLABS: usize = 1;

/// Nodes per slab of a [`SlabPool`] unless configured otherwise.
const DEFAULT_NODES_PER_SLAB: NonZero<usize> = nz!(64);

/// Arrays cached per [`ArrayPool`] bucket unless configured otherwise.
const DEFAULT_CACHE_SIZE: usize = 32;

/// Largest array length served by an [`ArrayPool`] unless configured otherwise.
const DEFAULT_MAX_ARRAY_LENGTH: usize = 1 << 20;

/// Node payload settings shared by the slab pool builders.
#[derive(Debug)]
struct NodeSettings {
    size: Option<usize>,
    alignment: usize,
}

impl NodeSettings {
    const fn new() -> Self {
        Self {
            size: None,
            alignment: 1,
        }
    }

    fn set_layout(&mut self, layout: Layout) {
        self.size = Some(layout.size());
        self.alignment = layout.align();
    }

    fn layout(&self, nodes_per_slab: usize) -> Result<Layout> {
        let size = self.size.expect(
            "node length must be set using .node_length(), .layout() or .layout_of::<T>() before calling .build()",
        );

        Layout::from_size_align(size, self.alignment).map_err(|_layout_error| {
            Error::LayoutTooLarge {
                node_size: size,
                nodes_per_slab,
            }
        })
    }
}

/// Builder for creating an instance of [`BitmapSlabPool`], usually through the
/// [`SlabPool32`](crate::SlabPool32) or [`SlabPool64`](crate::SlabPool64) aliases.
///
/// The node length is mandatory, whereas other settings are optional. Use `.node_length()` for
/// byte-aligned nodes, or `.layout()` / `.layout_of::<T>()` to also set the payload alignment.
///
/// # Examples
///
/// ```
/// use slab_pool::SlabPool32;
///
/// let pool = SlabPool32::builder()
///     .node_length(40)
///     .max_free_slabs(4)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.node_length(), 40);
/// assert_eq!(pool.max_free_slabs(), 4);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct BitmapSlabPoolBuilder<W: SlabBitmap> {
    node: NodeSettings,
    max_free_slabs: usize,

    _bitmap: PhantomData<W>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<W: SlabBitmap> BitmapSlabPoolBuilder<W> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            node: NodeSettings::new(),
            max_free_slabs: DEFAULT_MAX_FREE_SLABS,
            _bitmap: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the length in bytes of each node payload. Keeps the alignment set by an earlier
    /// `.layout()` call, otherwise payloads are byte-aligned.
    #[inline]
    pub fn node_length(mut self, length: usize) -> Self {
        self.node.size = Some(length);
        self
    }

    /// Sets the size and alignment of each node payload.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.node.set_layout(layout);
        self
    }

    /// Sizes and aligns each node payload to hold one `T`.
    #[inline]
    pub fn layout_of<T>(mut self) -> Self {
        self.node.set_layout(Layout::new::<T>());
        self
    }

    /// Sets how many completely vacant slabs the pool keeps in reserve instead of freeing them.
    #[inline]
    pub fn max_free_slabs(mut self, max_free_slabs: usize) -> Self {
        self.max_free_slabs = max_free_slabs;
        self
    }

    /// Builds the pool, allocating its first slab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayoutTooLarge`] if a slab of the configured nodes does not fit in
    /// memory.
    ///
    /// # Panics
    ///
    /// Panics if no node length has been set.
    pub fn build(self) -> Result<BitmapSlabPool<W>> {
        let layout = self.node.layout(W::BITS as usize)?;
        BitmapSlabPool::new_inner(layout, self.max_free_slabs)
    }
}

/// Builder for creating an instance of [`SlabPool`].
///
/// The node length is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slab_pool::SlabPool;
///
/// let pool = SlabPool::builder()
///     .node_length(100)
///     .nodes_per_slab(nz!(10))
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.nodes_per_slab(), 10);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct SlabPoolBuilder {
    node: NodeSettings,
    nodes_per_slab: NonZero<usize>,
    max_free_slabs: usize,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl SlabPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            node: NodeSettings::new(),
            nodes_per_slab: DEFAULT_NODES_PER_SLAB,
            max_free_slabs: DEFAULT_MAX_FREE_SLABS,
            _not_sync: PhantomData,
        }
    }

    /// Sets the length in bytes of each node payload. Keeps the alignment set by an earlier
    /// `.layout()` call, otherwise payloads are byte-aligned.
    #[inline]
    pub fn node_length(mut self, length: usize) -> Self {
        self.node.size = Some(length);
        self
    }

    /// Sets the size and alignment of each node payload.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.node.set_layout(layout);
        self
    }

    /// Sizes and aligns each node payload to hold one `T`.
    #[inline]
    pub fn layout_of<T>(mut self) -> Self {
        self.node.set_layout(Layout::new::<T>());
        self
    }

    /// Sets how many nodes each slab holds. Defaults to 64.
    #[inline]
    pub fn nodes_per_slab(mut self, nodes_per_slab: NonZero<usize>) -> Self {
        self.nodes_per_slab = nodes_per_slab;
        self
    }

    /// Sets how many completely vacant slabs the pool keeps in reserve instead of freeing them.
    #[inline]
    pub fn max_free_slabs(mut self, max_free_slabs: usize) -> Self {
        self.max_free_slabs = max_free_slabs;
        self
    }

    /// Builds the pool, allocating its first slab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LayoutTooLarge`] if a slab of the configured nodes does not fit in
    /// memory.
    ///
    /// # Panics
    ///
    /// Panics if no node length has been set.
    pub fn build(self) -> Result<SlabPool> {
        let layout = self.node.layout(self.nodes_per_slab.get())?;
        SlabPool::new_inner(layout, self.nodes_per_slab, self.max_free_slabs)
    }
}

/// Builder for creating an instance of [`ArrayPool`].
///
/// Every setting is optional.
///
/// # Examples
///
/// ```
/// use slab_pool::ArrayPool;
///
/// let pool = ArrayPool::<f32>::builder()
///     .max_length(4096)
///     .cache_size(8)
///     .max_free_slabs(0)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.bucket_count(), 9);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct ArrayPoolBuilder<T: Copy> {
    max_length: usize,
    cache_size: usize,
    max_free_slabs: usize,

    _element: PhantomData<fn() -> T>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Copy> ArrayPoolBuilder<T> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            max_length: DEFAULT_MAX_ARRAY_LENGTH,
            cache_size: DEFAULT_CACHE_SIZE,
            max_free_slabs: DEFAULT_MAX_FREE_SLABS,
            _element: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the largest array length the pool serves, at most
    /// [`MAX_ARRAY_LENGTH`](crate::MAX_ARRAY_LENGTH). It is rounded up to a power of two of at
    /// least 16.
    #[inline]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Sets how many released arrays each bucket keeps for reuse before handing them back to its
    /// slab pool. Zero disables the cache.
    #[inline]
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Sets how many completely vacant slabs each bucket's slab pool keeps in reserve.
    #[inline]
    pub fn max_free_slabs(mut self, max_free_slabs: usize) -> Self {
        self.max_free_slabs = max_free_slabs;
        self
    }

    /// Builds the pool. Buckets allocate their first slab when first rented from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaxLengthOutOfRange`] if the maximum length exceeds
    /// [`MAX_ARRAY_LENGTH`](crate::MAX_ARRAY_LENGTH) and [`Error::LayoutTooLarge`] if an array
    /// of that length does not fit in memory.
    pub fn build(self) -> Result<ArrayPool<T>> {
        ArrayPool::new_inner(self.max_length, self.cache_size, self.max_free_slabs)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(BitmapSlabPoolBuilder<u32>: Send, Debug);
    assert_impl_all!(SlabPoolBuilder: Send, Debug);
    assert_impl_all!(ArrayPoolBuilder<u8>: Send, Debug);
    assert_not_impl_any!(BitmapSlabPoolBuilder<u64>: Sync);
    assert_not_impl_any!(SlabPoolBuilder: Sync);
    assert_not_impl_any!(ArrayPoolBuilder<u8>: Sync);

    #[test]
    fn defaults() {
        let builder = SlabPoolBuilder::new();
        assert!(builder.node.size.is_none());
        assert_eq!(builder.node.alignment, 1);
        assert_eq!(builder.nodes_per_slab, DEFAULT_NODES_PER_SLAB);
        assert_eq!(builder.max_free_slabs, DEFAULT_MAX_FREE_SLABS);

        let builder = ArrayPoolBuilder::<u8>::new();
        assert_eq!(builder.max_length, DEFAULT_MAX_ARRAY_LENGTH);
        assert_eq!(builder.cache_size, DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn layout_of_sets_size_and_alignment() {
        let builder = BitmapSlabPoolBuilder::<u32>::new().layout_of::<u64>();

        assert_eq!(builder.node.size, Some(8));
        assert_eq!(builder.node.alignment, align_of::<u64>());
    }

    #[test]
    fn node_length_keeps_alignment() {
        let builder = SlabPoolBuilder::new()
            .layout(Layout::from_size_align(8, 64).unwrap())
            .node_length(100);

        assert_eq!(builder.node.size, Some(100));
        assert_eq!(builder.node.alignment, 64);

        let pool = builder.build().unwrap();
        assert_eq!(pool.node_layout(), Layout::from_size_align(100, 64).unwrap());
    }

    #[test]
    fn build_applies_settings() {
        let pool = BitmapSlabPoolBuilder::<u64>::new()
            .node_length(3)
            .max_free_slabs(7)
            .build()
            .unwrap();

        assert_eq!(pool.node_length(), 3);
        assert_eq!(pool.max_free_slabs(), 7);
        assert_eq!(pool.nodes_per_slab(), 64);

        let pool = SlabPoolBuilder::new()
            .node_length(5)
            .nodes_per_slab(nz!(3))
            .max_free_slabs(0)
            .build()
            .unwrap();

        assert_eq!(pool.nodes_per_slab(), 3);
        assert_eq!(pool.max_free_slabs(), 0);

        let pool = ArrayPoolBuilder::<u16>::new()
            .max_length(100)
            .cache_size(3)
            .build()
            .unwrap();

        assert_eq!(pool.max_length(), 128);
        assert_eq!(pool.cache_size(), 3);
    }

    #[test]
    #[should_panic]
    fn build_without_node_length_panics() {
        let _pool = SlabPoolBuilder::new().build();
    }

    #[test]
    #[should_panic]
    fn bitmap_build_without_node_length_panics() {
        let _pool = BitmapSlabPoolBuilder::<u32>::new().build();
    }

    #[test]
    fn node_length_beyond_address_space_is_error() {
        let result = SlabPoolBuilder::new().node_length(usize::MAX).build();

        assert!(matches!(result, Err(Error::LayoutTooLarge { .. })));
    }

    #[test]
    fn array_too_large_for_memory_is_error() {
        let result = ArrayPoolBuilder::<[u8; 1 << 40]>::new()
            .max_length(1 << 30)
            .build();

        assert!(matches!(result, Err(Error::LayoutTooLarge { .. })));
    }
}
