//! Freelist heaps.
//!
//! [`SegregatedHeap`] is the general-purpose allocator: requests route to
//! per-size-class free lists, empty classes replenish by carving a batch
//! of equal blocks from a [`Zone`] chunk, and requests too big for any
//! class take a dedicated mapping. Every returned pointer carries a
//! [`BlockHeader`] so `free` and `usable_size` are O(1) from the pointer
//! alone.
//!
//! [`SameSizeFreelist`] is the region-mode freelist discipline: one block
//! size fixed at configuration time, one free list, no headers.

use std::ptr::{self, NonNull};

use crate::arena::ARENA_HEADER_SIZE;
use crate::header::{BLOCK_HEADER_SIZE, BlockHeader};
use crate::heap::Heap;
use crate::size_class::{
    MAX_CLASS_SIZE, MIN_ALIGNMENT, NUM_SIZE_CLASSES, align_up, class_index, class_of_block_size,
    class_size,
};
use crate::source::{MemorySource, PAGE_SIZE};
use crate::stats::HeapStats;
use crate::zone::{ZONE_CHUNK_LEN, Zone};

/// Link stored in the first word of every free block.
struct FreeNode {
    next: *mut FreeNode,
}

/// Intrusive LIFO list threaded through free blocks themselves.
struct FreeList {
    head: *mut FreeNode,
    len: usize,
}

impl FreeList {
    const EMPTY: FreeList = FreeList {
        head: ptr::null_mut(),
        len: 0,
    };

    /// # Safety
    ///
    /// `block` must be exclusively owned, at least `size_of::<FreeNode>()`
    /// bytes, and pointer-aligned.
    #[inline]
    unsafe fn push(&mut self, block: NonNull<u8>) {
        let node = block.as_ptr().cast::<FreeNode>();
        // SAFETY: contract above; the block's bytes are dead storage.
        unsafe { node.write(FreeNode { next: self.head }) };
        self.head = node;
        self.len += 1;
    }

    /// # Safety
    ///
    /// Every node on the list must still be valid memory.
    #[inline]
    unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = NonNull::new(self.head)?;
        // SAFETY: head was written by push and not reused since.
        self.head = unsafe { (*node.as_ptr()).next };
        self.len -= 1;
        Some(node.cast())
    }
}

// ---------------------------------------------------------------------------
// SegregatedHeap
// ---------------------------------------------------------------------------

/// Size-class segregated freelist allocator over a zone and a raw source.
pub struct SegregatedHeap<S: MemorySource> {
    classes: [FreeList; NUM_SIZE_CLASSES],
    zone: Zone<S>,
    large_source: S,
    stats: HeapStats,
}

// SAFETY: free-list pointers reference memory exclusively owned by this
// heap (zone chunks and direct mappings); ownership moves with the value.
unsafe impl<S: MemorySource + Send> Send for SegregatedHeap<S> {}

impl<S: MemorySource + Copy> SegregatedHeap<S> {
    pub const fn new(source: S) -> Self {
        Self {
            classes: [FreeList::EMPTY; NUM_SIZE_CLASSES],
            zone: Zone::new(source),
            large_source: source,
            stats: HeapStats::ZERO,
        }
    }
}

impl<S: MemorySource + Clone> SegregatedHeap<S> {
    /// Runtime constructor for sources that are `Clone` but not `Copy`
    /// (accounting decorators in tests).
    pub fn from_source(source: S) -> Self {
        Self {
            classes: [FreeList::EMPTY; NUM_SIZE_CLASSES],
            zone: Zone::new(source.clone()),
            large_source: source,
            stats: HeapStats::ZERO,
        }
    }
}

impl<S: MemorySource> SegregatedHeap<S> {
    /// Allocates `size` bytes at the default alignment. Zero-byte
    /// requests are floored so the caller still gets a valid, freeable
    /// pointer.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let req = size.max(1);
        let total = req.checked_add(BLOCK_HEADER_SIZE)?;
        let Some((raw, block_size)) = self.raw_block(total) else {
            self.stats.oom_events += 1;
            return None;
        };
        // SAFETY: raw is a fresh block of block_size (+ header room for
        // the large path); user sits one header inside it.
        let user = unsafe { NonNull::new_unchecked(raw.as_ptr().add(BLOCK_HEADER_SIZE)) };
        unsafe { BlockHeader::install(raw, user, block_size) };
        self.stats.allocs += 1;
        Some(user)
    }

    /// Allocates `size` bytes aligned to `align` (a power of two at
    /// least [`MIN_ALIGNMENT`] is assumed; the ABI validates).
    pub fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        if align <= MIN_ALIGNMENT {
            return self.allocate(size);
        }
        let req = size.max(1);
        let total = req.checked_add(align)?.checked_add(BLOCK_HEADER_SIZE)?;
        let Some((raw, block_size)) = self.raw_block(total) else {
            self.stats.oom_events += 1;
            return None;
        };
        let user_addr = align_up(raw.as_ptr() as usize + BLOCK_HEADER_SIZE, align);
        // SAFETY: total reserved align + header bytes of slack, so the
        // aligned user pointer plus req stays inside the block.
        let user = unsafe { NonNull::new_unchecked(user_addr as *mut u8) };
        unsafe { BlockHeader::install(raw, user, block_size) };
        self.stats.allocs += 1;
        Some(user)
    }

    /// Returns a block to its size class, or unmaps it on the large
    /// path.
    ///
    /// # Safety
    ///
    /// `user` must be a live allocation from this heap.
    pub unsafe fn deallocate(&mut self, user: NonNull<u8>) {
        // SAFETY: allocate installed the header.
        let header = unsafe { BlockHeader::read(user) };
        let raw = unsafe { BlockHeader::block_start(user) };
        if header.block_size > MAX_CLASS_SIZE {
            // SAFETY: large blocks are whole mappings of block_size bytes.
            unsafe { self.large_source.unmap(raw, header.block_size) };
            self.stats.large_unmaps += 1;
        } else {
            let idx = class_of_block_size(header.block_size);
            // SAFETY: the block is dead and at least one class wide.
            unsafe { self.classes[idx].push(raw) };
        }
        self.stats.frees += 1;
    }

    /// Size-class-derived usable size: the block size minus the header
    /// and alignment overhead. An upper bound on the requested size.
    ///
    /// # Safety
    ///
    /// `user` must be a live allocation from this heap.
    #[must_use]
    pub unsafe fn usable_size(&self, user: NonNull<u8>) -> usize {
        // SAFETY: allocate installed the header.
        let header = unsafe { BlockHeader::read(user) };
        header.block_size - header.offset
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Blocks currently sitting on class freelists.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.classes.iter().map(|list| list.len).sum()
    }

    /// A raw block big enough for `total` bytes: popped from a class
    /// list, carved from the zone, or direct-mapped.
    fn raw_block(&mut self, total: usize) -> Option<(NonNull<u8>, usize)> {
        match class_index(total) {
            Some(idx) => {
                let block_size = class_size(idx);
                // SAFETY: class lists only hold blocks we carved.
                if let Some(raw) = unsafe { self.classes[idx].pop() } {
                    self.stats.class_hits += 1;
                    return Some((raw, block_size));
                }
                Some((self.refill_class(idx)?, block_size))
            }
            None => {
                let len = align_up(total, PAGE_SIZE);
                let raw = self.large_source.map(len)?;
                self.stats.large_maps += 1;
                Some((raw, len))
            }
        }
    }

    /// Carves a batch of `class_size(idx)` blocks from a fresh zone run,
    /// pushing all but the first onto the class list.
    fn refill_class(&mut self, idx: usize) -> Option<NonNull<u8>> {
        let block = class_size(idx);
        let batch = ((ZONE_CHUNK_LEN - ARENA_HEADER_SIZE) / block).clamp(1, 32);
        let run = self.zone.grab(block * batch)?;
        for i in 1..batch {
            // SAFETY: the run covers batch * block bytes; each carve is
            // block-aligned within it.
            unsafe {
                let carved = NonNull::new_unchecked(run.as_ptr().add(i * block));
                self.classes[idx].push(carved);
            }
        }
        self.stats.class_refills += 1;
        Some(run)
    }
}

impl<S: MemorySource> Heap for SegregatedHeap<S> {
    #[inline]
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        SegregatedHeap::allocate(self, size)
    }

    #[inline]
    fn allocate_aligned(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        SegregatedHeap::allocate_aligned(self, align, size)
    }

    #[inline]
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe { SegregatedHeap::deallocate(self, ptr) }
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: forwarded contract.
        unsafe { SegregatedHeap::usable_size(self, ptr) }
    }
}

// ---------------------------------------------------------------------------
// SameSizeFreelist
// ---------------------------------------------------------------------------

/// Single-class freelist for the region-mode same-size discipline.
///
/// All blocks share one size fixed by [`SameSizeFreelist::configure`];
/// freed blocks go straight back on the list, and `clear` returns every
/// zone chunk at once. No per-block headers: the configured size answers
/// every size query.
pub struct SameSizeFreelist<S: MemorySource> {
    free: FreeList,
    zone: Zone<S>,
    block_size: usize,
    carved: u64,
    reused: u64,
}

// SAFETY: as for `SegregatedHeap` — the list only points into memory the
// instance owns.
unsafe impl<S: MemorySource + Send> Send for SameSizeFreelist<S> {}

impl<S: MemorySource> SameSizeFreelist<S> {
    pub const fn new(source: S) -> Self {
        Self {
            free: FreeList::EMPTY,
            zone: Zone::new(source),
            block_size: 0,
            carved: 0,
            reused: 0,
        }
    }

    /// Fixes the block size for this lifecycle, dropping anything held
    /// from a previous one. The effective block is at least a free-list
    /// link wide and a multiple of the minimum alignment.
    pub fn configure(&mut self, one_size: usize) {
        self.clear();
        self.block_size = align_up(one_size.max(size_of::<FreeNode>()), MIN_ALIGNMENT);
    }

    /// Block size currently configured; zero before `configure`.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pops a free block, carving a new batch from the zone when the
    /// list is empty.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        debug_assert!(self.block_size != 0, "configure before allocating");
        // SAFETY: the list only holds blocks carved below.
        if let Some(block) = unsafe { self.free.pop() } {
            self.reused += 1;
            return Some(block);
        }
        self.carve()
    }

    /// Pushes a block back for reuse.
    ///
    /// # Safety
    ///
    /// `block` must have come from `allocate` on this instance during the
    /// current lifecycle and not be on the list already.
    #[inline]
    pub unsafe fn deallocate(&mut self, block: NonNull<u8>) {
        // SAFETY: contract above.
        unsafe { self.free.push(block) }
    }

    /// Releases every chunk and empties the list.
    pub fn clear(&mut self) {
        self.free = FreeList::EMPTY;
        self.zone.reset();
    }

    /// Bytes currently held from the source.
    #[must_use]
    pub fn bytes_held(&self) -> usize {
        self.zone.bytes_held()
    }

    /// Blocks carved from the zone over this instance's lifetime.
    #[must_use]
    pub fn blocks_carved(&self) -> u64 {
        self.carved
    }

    /// Blocks served by reuse off the free list.
    #[must_use]
    pub fn blocks_reused(&self) -> u64 {
        self.reused
    }

    fn carve(&mut self) -> Option<NonNull<u8>> {
        let block = self.block_size;
        let batch = ((ZONE_CHUNK_LEN - ARENA_HEADER_SIZE) / block).clamp(1, 64);
        let run = self.zone.grab(block * batch)?;
        for i in 1..batch {
            // SAFETY: the run covers batch * block bytes.
            unsafe {
                let carved = NonNull::new_unchecked(run.as_ptr().add(i * block));
                self.free.push(carved);
            }
        }
        self.carved += batch as u64;
        Some(run)
    }
}

impl<S: MemorySource> Heap for SameSizeFreelist<S> {
    #[inline]
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(size <= self.block_size, "request exceeds configured size");
        SameSizeFreelist::allocate(self)
    }

    #[inline]
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe { SameSizeFreelist::deallocate(self, ptr) }
    }

    #[inline]
    unsafe fn usable_size(&self, _ptr: NonNull<u8>) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MmapSource, TrackingSource};

    #[test]
    fn test_zero_size_request_gets_valid_pointer() {
        let mut heap = SegregatedHeap::new(MmapSource);
        let ptr = heap.allocate(0).expect("zero-size alloc");
        assert_eq!(ptr.as_ptr() as usize % MIN_ALIGNMENT, 0);
        unsafe {
            assert!(heap.usable_size(ptr) >= MIN_ALIGNMENT);
            heap.deallocate(ptr);
        }
    }

    #[test]
    fn test_usable_size_is_class_upper_bound() {
        let mut heap = SegregatedHeap::new(MmapSource);
        let ptr = heap.allocate(100).unwrap();
        let usable = unsafe { heap.usable_size(ptr) };
        // 100 + 16-byte header rounds into the 128 class.
        assert_eq!(usable, 128 - BLOCK_HEADER_SIZE);
        assert!(usable >= 100);
        unsafe { heap.deallocate(ptr) };
    }

    #[test]
    fn test_free_then_alloc_reuses_block() {
        let mut heap = SegregatedHeap::new(MmapSource);
        let a = heap.allocate(64).unwrap();
        unsafe { heap.deallocate(a) };
        // One refill carved a 32-block batch; all of it is free again.
        assert_eq!(heap.free_block_count(), 32);
        let b = heap.allocate(64).unwrap();
        assert_eq!(a, b, "same-class realloc should pop the freed block");
        assert_eq!(heap.stats().class_hits, 1);
        unsafe { heap.deallocate(b) };
    }

    #[test]
    fn test_blocks_in_one_class_do_not_overlap() {
        let mut heap = SegregatedHeap::new(MmapSource);
        let ptrs: Vec<NonNull<u8>> = (0..200).map(|_| heap.allocate(40).unwrap()).collect();
        let mut addrs: Vec<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 200);
        for window in addrs.windows(2) {
            // 40 + header lands in the 64-byte class.
            assert!(window[1] - window[0] >= 64);
        }
        for ptr in ptrs {
            unsafe { heap.deallocate(ptr) };
        }
    }

    #[test]
    fn test_large_allocations_map_and_unmap() {
        let source = TrackingSource::new(MmapSource);
        let mut heap = SegregatedHeap::from_source(source.clone());
        let before = source.live_bytes();
        let ptr = heap.allocate(MAX_CLASS_SIZE + 1).expect("large alloc");
        assert!(source.live_bytes() > before);
        assert!(unsafe { heap.usable_size(ptr) } >= MAX_CLASS_SIZE + 1);
        unsafe { heap.deallocate(ptr) };
        assert_eq!(source.live_bytes(), before);
        assert_eq!(heap.stats().large_maps, 1);
        assert_eq!(heap.stats().large_unmaps, 1);
    }

    #[test]
    fn test_aligned_allocations() {
        let mut heap = SegregatedHeap::new(MmapSource);
        for align in [32usize, 64, 256, 4096] {
            let ptr = heap.allocate_aligned(align, 100).expect("aligned alloc");
            assert_eq!(ptr.as_ptr() as usize % align, 0);
            assert!(unsafe { heap.usable_size(ptr) } >= 100);
            unsafe {
                std::ptr::write_bytes(ptr.as_ptr(), 0x3C, 100);
                heap.deallocate(ptr);
            }
        }
    }

    #[test]
    fn test_drop_returns_zone_chunks() {
        let source = TrackingSource::new(MmapSource);
        {
            let mut heap = SegregatedHeap::from_source(source.clone());
            let ptr = heap.allocate(64).unwrap();
            unsafe { heap.deallocate(ptr) };
            assert!(source.live_bytes() > 0);
        }
        assert_eq!(source.live_bytes(), 0);
    }

    #[test]
    fn test_same_size_churn_stays_bounded() {
        let source = TrackingSource::new(MmapSource);
        let mut list = SameSizeFreelist::new(source.clone());
        list.configure(24);
        assert_eq!(list.block_size(), 32);
        // Alloc/free churn must reuse freed blocks instead of growing.
        for _ in 0..100_000 {
            let block = list.allocate().expect("same-size alloc");
            unsafe { list.deallocate(block) };
        }
        assert_eq!(source.live_bytes(), ZONE_CHUNK_LEN);
        assert!(list.blocks_reused() >= 99_000);
        list.clear();
        assert_eq!(source.live_bytes(), 0);
    }

    #[test]
    fn test_same_size_distinct_while_live() {
        let mut list = SameSizeFreelist::new(MmapSource);
        list.configure(48);
        let blocks: Vec<NonNull<u8>> = (0..500).map(|_| list.allocate().unwrap()).collect();
        let mut addrs: Vec<usize> = blocks.iter().map(|b| b.as_ptr() as usize).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 500);
        for block in blocks {
            unsafe { list.deallocate(block) };
        }
        list.clear();
    }
}
