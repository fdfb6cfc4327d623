//! Zone layer: fixed-size chunk carving over a raw source.
//!
//! A [`Zone`] feeds the layers above it (freelist replenishment) out of
//! large chunks so that the raw source is hit rarely. It is the same
//! arena-chain mechanism as [`crate::arena::BumpRegion`], configured with
//! flat growth: the chunking concern is implemented once and reused.

use std::ptr::NonNull;

use crate::arena::{BumpRegion, Growth};
use crate::size_class::{MIN_ALIGNMENT, align_up};
use crate::source::MemorySource;

/// Default zone chunk size.
pub const ZONE_CHUNK_LEN: usize = 64 * 1024;

/// Carves aligned runs out of fixed-size source chunks.
pub struct Zone<S: MemorySource> {
    chain: BumpRegion<S>,
}

impl<S: MemorySource> Zone<S> {
    pub const fn new(source: S) -> Self {
        Self::with_chunk_len(source, ZONE_CHUNK_LEN)
    }

    pub const fn with_chunk_len(source: S, chunk_len: usize) -> Self {
        Self {
            chain: BumpRegion::with_geometry(source, Growth::FLAT, chunk_len),
        }
    }

    /// Hands out `len` bytes (rounded up to the minimum alignment) from
    /// the current chunk, mapping a new chunk when needed. A request
    /// larger than the chunk size gets a dedicated, exactly-fitting
    /// chunk.
    #[inline]
    pub fn grab(&mut self, len: usize) -> Option<NonNull<u8>> {
        self.chain.allocate(align_up(len, MIN_ALIGNMENT))
    }

    /// Releases every chunk back to the source.
    pub fn reset(&mut self) {
        self.chain.reset();
    }

    /// Bytes currently held from the source.
    #[must_use]
    pub fn bytes_held(&self) -> usize {
        self.chain.bytes_held()
    }

    /// Chunks mapped over this zone's lifetime.
    #[must_use]
    pub fn chunks_mapped(&self) -> u64 {
        self.chain.arenas_mapped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MmapSource, TrackingSource};

    #[test]
    fn test_zone_chunks_do_not_grow() {
        let source = TrackingSource::new(MmapSource);
        let mut zone = Zone::new(source.clone());
        zone.grab(1024).unwrap();
        assert_eq!(source.live_bytes(), ZONE_CHUNK_LEN);
        // Burn through the first chunk; the next one is the same size.
        while zone.chunks_mapped() == 1 {
            zone.grab(1024).unwrap();
        }
        assert_eq!(source.live_bytes(), 2 * ZONE_CHUNK_LEN);
        zone.reset();
        assert_eq!(source.live_bytes(), 0);
    }

    #[test]
    fn test_zone_serves_oversized_grabs() {
        let mut zone = Zone::new(MmapSource);
        let run = zone.grab(ZONE_CHUNK_LEN * 3).expect("oversized grab");
        unsafe {
            std::ptr::write_bytes(run.as_ptr(), 1, ZONE_CHUNK_LEN * 3);
        }
        zone.reset();
    }

    #[test]
    fn test_grab_rounds_to_min_alignment() {
        let mut zone = Zone::new(MmapSource);
        let a = zone.grab(1).unwrap().as_ptr() as usize;
        let b = zone.grab(1).unwrap().as_ptr() as usize;
        assert_eq!(b - a, MIN_ALIGNMENT);
        assert_eq!(a % MIN_ALIGNMENT, 0);
        zone.reset();
    }
}
