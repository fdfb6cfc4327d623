//! Bump allocation over a chain of arenas.
//!
//! [`BumpRegion`] is the foundational growth layer: it carves allocations
//! out of the current arena by advancing a cursor, and when the arena runs
//! dry it retires it onto a past-arena list and maps a fresh one whose
//! size grows geometrically. Individual frees are no-ops by contract; the
//! only way memory returns to the source is [`BumpRegion::reset`], which
//! releases every arena at once.
//!
//! Invariant: `remaining` is exactly the number of unallocated payload
//! bytes in the current arena. It is decremented by every successful bump
//! and only ever raised by a refill.

use std::ptr::{self, NonNull};

use crate::header::{OBJECT_HEADER_SIZE, ObjectHeader};
use crate::heap::Heap;
use crate::source::MemorySource;

/// Default first-chunk size for a fresh region.
pub const DEFAULT_CHUNK_LEN: usize = 4096;

/// In-band arena header: link to the previously retired arena plus the
/// mapping length, so `reset` can walk the list and unmap each one.
#[repr(C, align(16))]
struct ArenaHeader {
    next: *mut ArenaHeader,
    len: usize,
}

pub(crate) const ARENA_HEADER_SIZE: usize = size_of::<ArenaHeader>();

/// Geometric chunk-growth ratio. The multiplier is always at least 1:
/// construction rejects a numerator smaller than the denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    numerator: usize,
    denominator: usize,
}

impl Growth {
    /// 2:1 — each refill doubles the chunk size.
    pub const DOUBLING: Growth = Growth::new(2, 1);
    /// 1:1 — fixed-size chunks (the zone configuration).
    pub const FLAT: Growth = Growth::new(1, 1);

    #[must_use]
    pub const fn new(numerator: usize, denominator: usize) -> Self {
        assert!(denominator >= 1, "growth denominator must be nonzero");
        assert!(
            numerator >= denominator,
            "growth multiplier must be at least 1"
        );
        Self {
            numerator,
            denominator,
        }
    }

    #[inline]
    const fn advance(self, len: usize) -> usize {
        len.saturating_mul(self.numerator) / self.denominator
    }
}

/// Bump allocator over source-backed arenas with geometric growth.
pub struct BumpRegion<S: MemorySource> {
    source: S,
    /// Arena currently being bumped, or null before the first refill.
    current: *mut ArenaHeader,
    /// Next address to hand out inside the current arena.
    cursor: *mut u8,
    /// Unallocated payload bytes left in the current arena.
    remaining: usize,
    /// Retired arenas, newest first.
    past: *mut ArenaHeader,
    /// Chunk size the next refill will try (before the fit-the-request
    /// floor).
    next_chunk_len: usize,
    initial_chunk_len: usize,
    growth: Growth,
    arenas_mapped: u64,
    bytes_held: usize,
}

// SAFETY: the raw arena pointers are exclusively owned by this instance;
// moving the whole region to another thread moves ownership with it.
unsafe impl<S: MemorySource + Send> Send for BumpRegion<S> {}

impl<S: MemorySource> BumpRegion<S> {
    /// Doubling growth from a 4 KiB first chunk.
    pub const fn new(source: S) -> Self {
        Self::with_geometry(source, Growth::DOUBLING, DEFAULT_CHUNK_LEN)
    }

    pub const fn with_geometry(source: S, growth: Growth, initial_chunk_len: usize) -> Self {
        assert!(initial_chunk_len > ARENA_HEADER_SIZE);
        Self {
            source,
            current: ptr::null_mut(),
            cursor: ptr::null_mut(),
            remaining: 0,
            past: ptr::null_mut(),
            next_chunk_len: initial_chunk_len,
            initial_chunk_len,
            growth,
            arenas_mapped: 0,
            bytes_held: 0,
        }
    }

    /// Bumps off `size` bytes. `None` means the upstream source refused a
    /// refill.
    ///
    /// The caller is responsible for size alignment; handing in sizes
    /// that are multiples of [`crate::MIN_ALIGNMENT`] keeps every
    /// returned pointer aligned.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.current.is_null() || self.remaining < size {
            self.refill(size);
            if self.current.is_null() {
                return None;
            }
        }
        self.remaining -= size;
        let ptr = self.cursor;
        // SAFETY: the refill guarantees `size` bytes past the cursor.
        self.cursor = unsafe { self.cursor.add(size) };
        NonNull::new(ptr)
    }

    /// Bumps off `payload_size` bytes prefixed by an [`ObjectHeader`]
    /// recording `stored_size`, returning the pointer past the header.
    ///
    /// This is the size-taken region discipline: the header makes
    /// `malloc_usable_size` answerable without any per-object tracking in
    /// the bump layer itself.
    #[inline]
    pub fn allocate_with_header(
        &mut self,
        stored_size: usize,
        payload_size: usize,
    ) -> Option<NonNull<u8>> {
        let raw = self.allocate(payload_size.checked_add(OBJECT_HEADER_SIZE)?)?;
        debug_assert!(raw.as_ptr() as usize % align_of::<ObjectHeader>() == 0);
        // SAFETY: raw covers payload_size + OBJECT_HEADER_SIZE bytes.
        Some(unsafe { ObjectHeader::install(raw, stored_size) })
    }

    /// Releases every arena back to the source and restores the initial
    /// empty state, including the chunk-growth schedule.
    ///
    /// All pointers previously returned by this region are dead after
    /// this call.
    pub fn reset(&mut self) {
        let mut node = self.past;
        while !node.is_null() {
            // SAFETY: every node on the past list was written by refill
            // and is unmapped exactly once here.
            unsafe {
                let next = (*node).next;
                let len = (*node).len;
                self.source.unmap(NonNull::new_unchecked(node.cast()), len);
                node = next;
            }
        }
        if !self.current.is_null() {
            // SAFETY: same contract as above for the live arena.
            unsafe {
                let len = (*self.current).len;
                self.source
                    .unmap(NonNull::new_unchecked(self.current.cast()), len);
            }
        }
        self.past = ptr::null_mut();
        self.current = ptr::null_mut();
        self.cursor = ptr::null_mut();
        self.remaining = 0;
        self.next_chunk_len = self.initial_chunk_len;
        self.bytes_held = 0;
    }

    /// Retires the current arena and maps a fresh one big enough for
    /// `size`. On failure the region is left with no current arena and
    /// zero remaining space.
    fn refill(&mut self, size: usize) {
        if !self.current.is_null() {
            // SAFETY: current points at a live arena header we wrote.
            unsafe { (*self.current).next = self.past };
            self.past = self.current;
            self.current = ptr::null_mut();
        }
        self.cursor = ptr::null_mut();
        self.remaining = 0;

        let Some(needed) = size.checked_add(ARENA_HEADER_SIZE) else {
            return;
        };
        let mut len = self.next_chunk_len;
        self.next_chunk_len = self.growth.advance(self.next_chunk_len);
        if len < needed {
            // A single oversized request gets a chunk sized to fit; it
            // will be retired as soon as a new bump target is needed.
            len = needed;
        }
        let Some(raw) = self.source.map(len) else {
            return;
        };
        let header = raw.as_ptr().cast::<ArenaHeader>();
        // SAFETY: the mapping is at least header-sized and page-aligned.
        unsafe {
            header.write(ArenaHeader {
                next: ptr::null_mut(),
                len,
            });
            self.cursor = raw.as_ptr().add(ARENA_HEADER_SIZE);
        }
        self.current = header;
        self.remaining = len - ARENA_HEADER_SIZE;
        self.arenas_mapped += 1;
        self.bytes_held += len;
    }

    /// Arenas mapped over this region's lifetime (not reduced by reset).
    #[must_use]
    pub fn arenas_mapped(&self) -> u64 {
        self.arenas_mapped
    }

    /// Bytes currently held from the source.
    #[must_use]
    pub fn bytes_held(&self) -> usize {
        self.bytes_held
    }

    /// Unallocated bytes left in the current arena.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<S: MemorySource> Heap for BumpRegion<S> {
    #[inline]
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        BumpRegion::allocate(self, size)
    }

    /// Free in a region is a no-op.
    #[inline]
    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>) {}

    /// The bump layer tracks nothing per object; configurations that need
    /// size queries wrap allocations with [`ObjectHeader`].
    #[inline]
    unsafe fn usable_size(&self, _ptr: NonNull<u8>) -> usize {
        0
    }
}

impl<S: MemorySource> Drop for BumpRegion<S> {
    fn drop(&mut self) {
        self.reset();
    }
}
