//! Size-class math for the segregated heap.
//!
//! Classes are powers of two (Kingsley style) from [`MIN_CLASS_SIZE`] up to
//! [`MAX_CLASS_SIZE`]; anything above the largest class takes the
//! direct-mapped large path. Class sizes include the per-block header, so
//! the mapping from a user request to a class goes through
//! `request + BLOCK_HEADER_SIZE` first.

/// Minimum alignment of every pointer handed to callers.
///
/// The original interposition targets used 8 here; the x86-64 psABI (and
/// glibc) promise `alignof(max_align_t)` = 16, so a drop-in replacement
/// must too.
pub const MIN_ALIGNMENT: usize = 16;

/// Smallest block size (header included).
pub const MIN_CLASS_SIZE: usize = 32;

/// Largest block size served from a size class. Above this, allocations
/// get a dedicated mapping.
pub const MAX_CLASS_SIZE: usize = 256 * 1024;

/// Number of discrete size classes: 32, 64, ..., 256 KiB.
pub const NUM_SIZE_CLASSES: usize =
    (MAX_CLASS_SIZE.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros() + 1) as usize;

/// Rounds `n` up to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Class index for a total block size, or `None` for the large path.
#[inline]
#[must_use]
pub fn class_index(total: usize) -> Option<usize> {
    let needed = total.max(MIN_CLASS_SIZE).next_power_of_two();
    if needed > MAX_CLASS_SIZE {
        return None;
    }
    Some((needed.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize)
}

/// Block size of class `index`.
#[inline]
#[must_use]
pub const fn class_size(index: usize) -> usize {
    MIN_CLASS_SIZE << index
}

/// Recovers the class index from a block size written into a header.
///
/// Only meaningful for sizes produced by [`class_size`].
#[inline]
#[must_use]
pub fn class_of_block_size(block_size: usize) -> usize {
    debug_assert!(block_size.is_power_of_two() && block_size <= MAX_CLASS_SIZE);
    (block_size.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize
}
