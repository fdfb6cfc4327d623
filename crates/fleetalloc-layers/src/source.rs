//! Raw memory sources.
//!
//! The bottom of every layer stack: something that can hand out and take
//! back whole mappings. Layers above never talk to the operating system
//! directly; they go through a [`MemorySource`] so that tests can swap in
//! an accounting decorator and embedders can swap in their own backing.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backing-store page granularity used when sizing direct mappings.
pub const PAGE_SIZE: usize = 4096;

/// A supplier of raw memory mappings.
///
/// `map` returns memory aligned to at least [`PAGE_SIZE`], zero-filled on
/// first touch, or `None` when the system cannot satisfy the request.
pub trait MemorySource {
    /// Obtains a fresh mapping of at least `len` bytes.
    fn map(&self, len: usize) -> Option<NonNull<u8>>;

    /// Returns a mapping to the system.
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must correspond exactly to a prior successful `map` on
    /// this source, and the mapping must not be used afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize);
}

/// Anonymous private `mmap` source — the default backing for every heap
/// in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapSource;

impl MemorySource for MmapSource {
    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        // SAFETY: anonymous private mapping; no fd, no file offset.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(addr.cast::<u8>())
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees ptr/len came from a successful map.
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), len);
        }
    }
}

/// Accounting decorator around another source.
///
/// Tracks outstanding mappings and bytes so tests can assert the
/// reclaim-all property: after a region lifecycle ends, the bytes held
/// through this source return to exactly their prior level.
#[derive(Debug, Clone)]
pub struct TrackingSource<S> {
    inner: S,
    live_bytes: Arc<AtomicUsize>,
    live_mappings: Arc<AtomicUsize>,
    total_mappings: Arc<AtomicUsize>,
}

impl<S> TrackingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            live_bytes: Arc::new(AtomicUsize::new(0)),
            live_mappings: Arc::new(AtomicUsize::new(0)),
            total_mappings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes currently held from the inner source.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    /// Mappings currently held from the inner source.
    #[must_use]
    pub fn live_mappings(&self) -> usize {
        self.live_mappings.load(Ordering::SeqCst)
    }

    /// Mappings ever handed out, including ones already returned.
    #[must_use]
    pub fn total_mappings(&self) -> usize {
        self.total_mappings.load(Ordering::SeqCst)
    }
}

impl<S: MemorySource> MemorySource for TrackingSource<S> {
    fn map(&self, len: usize) -> Option<NonNull<u8>> {
        let ptr = self.inner.map(len)?;
        self.live_bytes.fetch_add(len, Ordering::SeqCst);
        self.live_mappings.fetch_add(1, Ordering::SeqCst);
        self.total_mappings.fetch_add(1, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.unmap(ptr, len) };
        self.live_bytes.fetch_sub(len, Ordering::SeqCst);
        self.live_mappings.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmap_round_trip() {
        let source = MmapSource;
        let ptr = source.map(PAGE_SIZE).expect("mmap failed");
        // Fresh anonymous mappings are zero-filled and writable.
        unsafe {
            assert_eq!(*ptr.as_ptr(), 0);
            *ptr.as_ptr() = 0xAB;
            assert_eq!(*ptr.as_ptr(), 0xAB);
            source.unmap(ptr, PAGE_SIZE);
        }
    }

    #[test]
    fn test_map_zero_len_fails() {
        assert!(MmapSource.map(0).is_none());
    }

    #[test]
    fn test_tracking_source_accounting() {
        let source = TrackingSource::new(MmapSource);
        assert_eq!(source.live_bytes(), 0);

        let a = source.map(PAGE_SIZE).unwrap();
        let b = source.map(2 * PAGE_SIZE).unwrap();
        assert_eq!(source.live_bytes(), 3 * PAGE_SIZE);
        assert_eq!(source.live_mappings(), 2);

        unsafe {
            source.unmap(a, PAGE_SIZE);
            source.unmap(b, 2 * PAGE_SIZE);
        }
        assert_eq!(source.live_bytes(), 0);
        assert_eq!(source.live_mappings(), 0);
        assert_eq!(source.total_mappings(), 2);
    }

    #[test]
    fn test_tracking_source_clones_share_counters() {
        let source = TrackingSource::new(MmapSource);
        let clone = source.clone();
        let ptr = clone.map(PAGE_SIZE).unwrap();
        assert_eq!(source.live_mappings(), 1);
        unsafe { source.unmap(ptr, PAGE_SIZE) };
        assert_eq!(clone.live_mappings(), 0);
    }
}
