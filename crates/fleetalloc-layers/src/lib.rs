//! # fleetalloc-layers
//!
//! Composable heap layers: the building blocks fleetalloc stacks into both
//! its general-purpose process heap and its per-thread region-mode
//! sub-allocators.
//!
//! Leaf to root:
//! - [`source::MemorySource`] — raw memory (mmap) behind everything.
//! - [`arena::BumpRegion`] — bump allocation over a chain of arenas with
//!   geometric chunk growth; free is a no-op, reclaim is en masse.
//! - [`zone::Zone`] — fixed-size chunk carving for the layers above.
//! - [`freelist::SegregatedHeap`] — size-class segregated freelists
//!   replenished from a zone, plus a direct-mapped large path.
//! - [`freelist::SameSizeFreelist`] — a single-class freelist for the
//!   region-mode same-size discipline.
//! - [`lock::LockedHeap`] / [`lock::SingleThreadHeap`] — thread-safety
//!   wrappers.
//!
//! Layers compose by wrapping and delegation through the [`heap::Heap`]
//! capability trait; there is no inheritance and no hidden global state.
//! Every layer is independently usable and independently testable.

pub mod arena;
pub mod freelist;
pub mod header;
pub mod heap;
pub mod lock;
pub mod size_class;
pub mod source;
pub mod stats;
pub mod zone;

pub use arena::{BumpRegion, Growth};
pub use freelist::{SameSizeFreelist, SegregatedHeap};
pub use header::{BLOCK_HEADER_SIZE, BlockHeader, OBJECT_HEADER_SIZE, ObjectHeader};
pub use heap::Heap;
pub use lock::{LockedHeap, SingleThreadHeap};
pub use size_class::MIN_ALIGNMENT;
pub use source::{MemorySource, MmapSource, TrackingSource};
pub use stats::HeapStats;
pub use zone::Zone;
