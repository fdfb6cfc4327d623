//! In-band metadata headers.
//!
//! Two header shapes live immediately before a user pointer, both
//! maximally aligned so the user pointer stays aligned:
//!
//! - [`ObjectHeader`] — region mode. Stores the originally requested size
//!   so `malloc_usable_size` can answer in O(1) when the bump discipline
//!   (which tracks nothing per object) is active.
//! - [`BlockHeader`] — general-purpose heap. Stores the full block size
//!   and the user pointer's offset from the raw block start, which is how
//!   `free` finds the block again for aligned allocations.
//!
//! The invariant in both cases: the header is recoverable from the user
//! pointer by a fixed negative offset (`user - size_of::<header>()`), and
//! every pointer returned under a header-carrying configuration has one.
//! Handing out a pointer without its header and then querying it is
//! undefined behavior by contract.

use std::ptr::NonNull;

/// Region-mode object header: the originally requested size.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct ObjectHeader {
    pub size: usize,
}

pub const OBJECT_HEADER_SIZE: usize = size_of::<ObjectHeader>();

impl ObjectHeader {
    /// Writes a header at `raw` and returns the user pointer just past it.
    ///
    /// # Safety
    ///
    /// `raw` must be valid for at least `OBJECT_HEADER_SIZE` bytes and
    /// aligned to 16.
    #[inline]
    pub unsafe fn install(raw: NonNull<u8>, size: usize) -> NonNull<u8> {
        let header = raw.as_ptr().cast::<ObjectHeader>();
        // SAFETY: caller guarantees raw covers the header.
        unsafe {
            header.write(ObjectHeader { size });
            NonNull::new_unchecked(raw.as_ptr().add(OBJECT_HEADER_SIZE))
        }
    }

    /// Reads back the requested size stored for `user`.
    ///
    /// # Safety
    ///
    /// `user` must have been produced by [`ObjectHeader::install`].
    #[inline]
    #[must_use]
    pub unsafe fn recover(user: NonNull<u8>) -> usize {
        // SAFETY: install placed the header exactly one header-size below.
        unsafe { user.as_ptr().cast::<ObjectHeader>().sub(1).read().size }
    }
}

/// General-heap block header: block size plus user-pointer back-offset.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct BlockHeader {
    /// Total size of the underlying block (size-class block size, or the
    /// mapping length for the large path).
    pub block_size: usize,
    /// Distance from the raw block start to the user pointer. Always at
    /// least `BLOCK_HEADER_SIZE`; larger for aligned allocations.
    pub offset: usize,
}

pub const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();

impl BlockHeader {
    /// Writes a header describing `user`'s position inside the block at
    /// `raw`, immediately below `user`.
    ///
    /// # Safety
    ///
    /// `user` must lie inside the block starting at `raw`, at least
    /// `BLOCK_HEADER_SIZE` bytes past it, and be 16-aligned.
    #[inline]
    pub unsafe fn install(raw: NonNull<u8>, user: NonNull<u8>, block_size: usize) {
        let offset = user.as_ptr() as usize - raw.as_ptr() as usize;
        debug_assert!(offset >= BLOCK_HEADER_SIZE);
        debug_assert!(offset + BLOCK_HEADER_SIZE <= block_size + BLOCK_HEADER_SIZE);
        // SAFETY: caller guarantees the byte range below user is inside
        // the block.
        unsafe {
            user.as_ptr()
                .cast::<BlockHeader>()
                .sub(1)
                .write(BlockHeader { block_size, offset });
        }
    }

    /// Reads the header below `user`.
    ///
    /// # Safety
    ///
    /// `user` must have a header written by [`BlockHeader::install`].
    #[inline]
    #[must_use]
    pub unsafe fn read(user: NonNull<u8>) -> BlockHeader {
        // SAFETY: contract above.
        unsafe { user.as_ptr().cast::<BlockHeader>().sub(1).read() }
    }

    /// Raw block start recovered from `user` via the stored offset.
    ///
    /// # Safety
    ///
    /// Same contract as [`BlockHeader::read`].
    #[inline]
    #[must_use]
    pub unsafe fn block_start(user: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: contract above; offset was computed from this block.
        unsafe {
            let header = BlockHeader::read(user);
            NonNull::new_unchecked(user.as_ptr().sub(header.offset))
        }
    }
}
