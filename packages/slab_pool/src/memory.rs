//! Raw memory boundary toward the system allocator.
//!
//! The pools in this crate obtain whole slabs through this module and never touch the global
//! allocator directly. Allocation failure is not treated as a recoverable condition: it is
//! reported through [`std::alloc::handle_alloc_error`], which aborts the process by default.
//!
//! Unlike a C-style `free()`, releasing memory requires the size (and for aligned allocations,
//! the alignment) that was used to allocate it, because the Rust global allocator is
//! layout-based.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::{Error, Result};

/// Alignment of memory returned by [`alloc()`] and [`alloc_zeroed()`].
///
/// This matches what typical `malloc()` implementations guarantee on 64-bit platforms, so any
/// primitive value can be stored at the start of the returned block.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Allocates `size` bytes of uninitialized memory aligned to [`DEFAULT_ALIGNMENT`].
///
/// A zero `size` yields a dangling, well-aligned pointer that must not be dereferenced.
///
/// # Panics
///
/// Panics if `size` rounded up to the alignment exceeds `isize::MAX`.
#[must_use]
pub fn alloc(size: usize) -> NonNull<u8> {
    allocate(default_layout(size))
}

/// Allocates `size` bytes of zero-initialized memory aligned to [`DEFAULT_ALIGNMENT`].
///
/// # Panics
///
/// Panics if `size` rounded up to the alignment exceeds `isize::MAX`.
#[must_use]
pub fn alloc_zeroed(size: usize) -> NonNull<u8> {
    allocate_zeroed(default_layout(size))
}

/// Releases memory obtained from [`alloc()`] or [`alloc_zeroed()`].
///
/// # Safety
///
/// `ptr` must have been returned by [`alloc()`] or [`alloc_zeroed()`] called with the same `size`
/// and must not have been freed already.
pub unsafe fn free(ptr: NonNull<u8>, size: usize) {
    // SAFETY: Forwarding guarantees from the caller, who allocated with the same layout.
    unsafe {
        deallocate(ptr, default_layout(size));
    }
}

/// Allocates `size` bytes of uninitialized memory aligned to `alignment`.
///
/// # Errors
///
/// Returns [`Error::InvalidAlignment`] if `alignment` is not a power of two and
/// [`Error::LayoutTooLarge`] if `size` rounded up to `alignment` exceeds `isize::MAX`.
pub fn aligned_alloc(size: usize, alignment: usize) -> Result<NonNull<u8>> {
    Ok(allocate(aligned_layout(size, alignment)?))
}

/// Releases memory obtained from [`aligned_alloc()`].
///
/// # Safety
///
/// `ptr` must have been returned by [`aligned_alloc()`] called with the same `size` and
/// `alignment` and must not have been freed already.
pub unsafe fn aligned_free(ptr: NonNull<u8>, size: usize, alignment: usize) {
    let layout = aligned_layout(size, alignment)
        .expect("the caller guarantees the layout was valid when the memory was allocated");

    // SAFETY: Forwarding guarantees from the caller, who allocated with the same layout.
    unsafe {
        deallocate(ptr, layout);
    }
}

fn default_layout(size: usize) -> Layout {
    Layout::from_size_align(size, DEFAULT_ALIGNMENT)
        .expect("requested allocation size exceeds the size of virtual memory")
}

fn aligned_layout(size: usize, alignment: usize) -> Result<Layout> {
    if !alignment.is_power_of_two() {
        return Err(Error::InvalidAlignment { alignment });
    }

    Layout::from_size_align(size, alignment).map_err(|_layout_error| Error::LayoutTooLarge {
        node_size: size,
        nodes_per_slab: 1,
    })
}

/// Allocates a block for `layout`, aborting via the allocation error handler on failure.
#[must_use]
pub(crate) fn allocate(layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        return dangling(layout);
    }

    // SAFETY: The layout has a non-zero size, as checked above.
    let ptr = unsafe { alloc::alloc(layout) };

    NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
}

/// Allocates a zeroed block for `layout`, aborting via the allocation error handler on failure.
#[must_use]
pub(crate) fn allocate_zeroed(layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        return dangling(layout);
    }

    // SAFETY: The layout has a non-zero size, as checked above.
    let ptr = unsafe { alloc::alloc_zeroed(layout) };

    NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
}

/// Releases a block obtained from [`allocate()`] or [`allocate_zeroed()`].
///
/// # Safety
///
/// `ptr` must have been allocated by this module with the same `layout` and not freed yet.
pub(crate) unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() == 0 {
        return;
    }

    // SAFETY: Forwarding guarantees from the caller. Zero-sized layouts never reach the
    // allocator, matching the behavior of allocate().
    unsafe {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // An address equal to the alignment is non-null and suitably aligned. It is never
    // dereferenced because the block has no bytes.
    NonNull::<u8>::dangling().with_addr(
        layout
            .align()
            .try_into()
            .expect("alignment is a non-zero power of two"),
    )
}

#[cfg(test)]
#[expect(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code, we assume safety is considered"
)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_default_aligned_and_writable() {
        let ptr = alloc(100);
        assert_eq!(ptr.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);

        unsafe {
            ptr.write_bytes(0xAB, 100);
            assert_eq!(ptr.add(99).read(), 0xAB);
            free(ptr, 100);
        }
    }

    #[test]
    fn alloc_zeroed_is_zeroed() {
        let ptr = alloc_zeroed(64);

        unsafe {
            for offset in 0..64 {
                assert_eq!(ptr.add(offset).read(), 0);
            }
            free(ptr, 64);
        }
    }

    #[test]
    fn zero_size_alloc_is_dangling_and_free_is_no_op() {
        let ptr = alloc(0);
        assert_eq!(ptr.as_ptr() as usize, DEFAULT_ALIGNMENT);

        unsafe {
            free(ptr, 0);
        }
    }

    #[test]
    fn aligned_alloc_honors_alignment() {
        for alignment in [1, 2, 8, 64, 4096] {
            let ptr = aligned_alloc(48, alignment).unwrap();
            assert_eq!(ptr.as_ptr() as usize % alignment, 0);

            unsafe {
                ptr.write_bytes(1, 48);
                aligned_free(ptr, 48, alignment);
            }
        }
    }

    #[test]
    fn aligned_alloc_rejects_bad_alignment() {
        assert!(matches!(
            aligned_alloc(16, 3),
            Err(Error::InvalidAlignment { alignment: 3 })
        ));
        assert!(matches!(
            aligned_alloc(16, 0),
            Err(Error::InvalidAlignment { alignment: 0 })
        ));
    }

    #[test]
    fn aligned_alloc_rejects_oversized_request() {
        assert!(matches!(
            aligned_alloc(usize::MAX, 8),
            Err(Error::LayoutTooLarge { .. })
        ));
    }
}
