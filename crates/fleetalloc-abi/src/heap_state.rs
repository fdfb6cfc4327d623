//! The shared process heap.
//!
//! One general-purpose heap serves every thread whose region mode is
//! inactive. It is built by stacking layers: a segregated freelist over a
//! zone over raw mmap, wrapped for thread safety unless the
//! `single-threaded` feature trades that for lower overhead.
//!
//! The static is fully `const`-constructed. Nothing here is lazily
//! initialized, so the first `malloc` of the process cannot recurse into
//! an initializer that itself allocates.

use fleetalloc_core::telemetry::HeapReport;
use fleetalloc_core::with_mode;
use fleetalloc_layers::source::MmapSource;
use fleetalloc_layers::{HeapStats, SegregatedHeap};

#[cfg(not(feature = "single-threaded"))]
pub type ProcessHeap = fleetalloc_layers::LockedHeap<SegregatedHeap<MmapSource>>;

#[cfg(feature = "single-threaded")]
pub type ProcessHeap = fleetalloc_layers::SingleThreadHeap<SegregatedHeap<MmapSource>>;

#[cfg(not(feature = "single-threaded"))]
static PROCESS_HEAP: ProcessHeap =
    fleetalloc_layers::LockedHeap::new(SegregatedHeap::new(MmapSource));

#[cfg(feature = "single-threaded")]
static PROCESS_HEAP: ProcessHeap =
    fleetalloc_layers::SingleThreadHeap::new(SegregatedHeap::new(MmapSource));

/// The process-wide general-purpose heap.
#[inline]
#[must_use]
pub fn process_heap() -> &'static ProcessHeap {
    &PROCESS_HEAP
}

/// Counter snapshot of the shared heap.
#[must_use]
pub fn heap_stats() -> HeapStats {
    PROCESS_HEAP.with(|heap| heap.stats())
}

/// Full allocator report: shared-heap counters plus the calling thread's
/// region state and recent lifecycle events.
#[must_use]
pub fn report() -> HeapReport {
    let stats = heap_stats();
    with_mode(|mode| HeapReport::gather(stats, mode))
}
