//! The capability interface every layer composes through.

use std::ptr::NonNull;

/// A heap layer: something that can hand out blocks, take them back, and
/// answer size queries for pointers it issued.
///
/// Layers are composed by wrapping and delegation (a lock wrapper holds a
/// `Heap`, the per-thread mode state owns two `Heap`s, ...) rather than by
/// inheritance. Methods take `&mut self`; wrappers that need shared access
/// (see [`crate::lock`]) provide their own `&self` surface on top.
pub trait Heap {
    /// Allocates `size` bytes, or `None` when the upstream source is
    /// exhausted.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Allocates `size` bytes aligned to `align` (a power of two).
    ///
    /// Layers without real alignment support serve the default-alignment
    /// case and refuse the rest.
    fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        if align <= crate::size_class::MIN_ALIGNMENT {
            self.allocate(size)
        } else {
            None
        }
    }

    /// Returns a block to this heap. May be a no-op for layers that only
    /// reclaim en masse.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate`/`allocate_aligned` on
    /// this same instance and not deallocated since.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>);

    /// Usable size of the block behind `ptr`; an upper bound on the
    /// originally requested size for layers that track one, `0` for
    /// layers that track nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this instance.
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize;
}
