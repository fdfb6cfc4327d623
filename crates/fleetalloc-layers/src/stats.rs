//! Allocation counters.
//!
//! Plain counters updated under whatever exclusion the owning layer
//! already has (the lock wrapper for the shared heap, thread locality for
//! region-mode heaps). Snapshots are `Copy` so callers can diff them.

/// Counters for a general-purpose heap instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful allocations.
    pub allocs: u64,
    /// Frees routed back to the heap.
    pub frees: u64,
    /// Allocations served by popping a class freelist.
    pub class_hits: u64,
    /// Times a class freelist had to be replenished from the zone.
    pub class_refills: u64,
    /// Direct mappings created for large allocations.
    pub large_maps: u64,
    /// Direct mappings released.
    pub large_unmaps: u64,
    /// Allocation attempts refused by the upstream source.
    pub oom_events: u64,
}

impl HeapStats {
    pub const ZERO: HeapStats = HeapStats {
        allocs: 0,
        frees: 0,
        class_hits: 0,
        class_refills: 0,
        large_maps: 0,
        large_unmaps: 0,
        oom_events: 0,
    };

    /// Allocations not yet freed.
    #[must_use]
    pub fn live_allocations(&self) -> u64 {
        self.allocs.saturating_sub(self.frees)
    }
}
