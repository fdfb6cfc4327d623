//! Region-mode lifecycle tests: routing swaps, header round-trips,
//! reclaim-all, thread isolation, and the freelist discipline's reuse
//! behavior. Region state is thread-local, and the test harness runs
//! each test on its own thread, so the lifecycles here cannot interfere
//! with each other.

use std::ptr;

use fleetalloc_abi::malloc_abi::{calloc, free, malloc, malloc_usable_size, memalign, realloc};
use fleetalloc_abi::region_abi::{region_begin, region_end};
use fleetalloc_core::with_mode;

/// `region_begin` with the default bump/size-taken flags.
unsafe fn begin_bump_with_sizes() {
    unsafe { region_begin(false, false, true, false, true, 8) };
}

#[test]
fn test_size_taken_region_round_trip_then_general_heap() {
    unsafe {
        begin_bump_with_sizes();
        let p = malloc(100);
        assert!(!p.is_null());
        // The object header stores the exact requested size.
        assert_eq!(malloc_usable_size(p), 100);
        region_end();

        // Back on the general-purpose heap: usable size is the
        // size-class upper bound, at least 100 but not exactly 100.
        let q = malloc(100);
        assert!(!q.is_null());
        let usable = malloc_usable_size(q);
        assert!(usable >= 100);
        assert_eq!(usable, 112);
        free(q);
    }
}

#[test]
fn test_same_size_churn_is_stable() {
    unsafe {
        region_begin(false, false, true, true, false, 24);
        let mut held_after_warmup = 0;
        for i in 0..100_000 {
            let p = malloc(24);
            assert!(!p.is_null(), "same-size region ran out of memory");
            assert_eq!(malloc_usable_size(p), 24);
            ptr::write_bytes(p.cast::<u8>(), 0x42, 24);
            free(p);
            if i == 100 {
                held_after_warmup = with_mode(|mode| mode.bytes_held());
            }
        }
        // Freed blocks were recycled off the free list; the footprint
        // settled immediately and never grew again.
        let held = with_mode(|mode| mode.bytes_held());
        assert_eq!(held, held_after_warmup);
        region_end();
        assert_eq!(with_mode(|mode| mode.bytes_held()), 0);
    }
}

#[test]
fn test_region_end_reclaims_everything() {
    let before = with_mode(|mode| mode.bytes_held());
    assert_eq!(before, 0);
    unsafe {
        begin_bump_with_sizes();
        for _ in 0..10_000 {
            assert!(!malloc(200).is_null());
        }
        assert!(with_mode(|mode| mode.bytes_held()) > 0);
        region_end();
    }
    assert_eq!(with_mode(|mode| mode.bytes_held()), 0);
}

#[test]
fn test_bump_frees_are_noops() {
    unsafe {
        begin_bump_with_sizes();
        let p = malloc(64).cast::<u8>();
        ptr::write_bytes(p, 0x77, 64);
        free(p.cast());
        // The no-op free reclaimed nothing; the bytes are still ours
        // until region_end.
        assert_eq!(*p, 0x77);
        let q = malloc(64);
        assert_ne!(q.cast::<u8>(), p, "bump region must not recycle");
        region_end();
    }
}

#[test]
fn test_bump_allocations_are_aligned_and_disjoint() {
    unsafe {
        begin_bump_with_sizes();
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for i in 0..1_000 {
            let size = 1 + (i % 200);
            let p = malloc(size) as usize;
            assert_eq!(p % 16, 0);
            for &(start, len) in &ranges {
                assert!(p + size <= start || p >= start + len);
            }
            ranges.push((p, size));
        }
        region_end();
    }
}

#[test]
fn test_zero_size_floor_in_region() {
    unsafe {
        begin_bump_with_sizes();
        let a = malloc(0);
        let b = malloc(0);
        assert!(!a.is_null() && !b.is_null());
        // Each zero-byte request still consumes a full granule.
        assert_ne!(a, b);
        // The stored requested size is faithfully zero.
        assert_eq!(malloc_usable_size(a), 0);
        region_end();
    }
}

#[test]
fn test_mode_isolation_across_threads() {
    unsafe {
        begin_bump_with_sizes();
        let p = malloc(100);
        assert_eq!(malloc_usable_size(p), 100);

        // A sibling thread is untouched by this thread's region: its
        // malloc routes to the general heap and reports the class bound.
        std::thread::spawn(|| {
            assert!(!with_mode(|mode| mode.is_active()));
            let q = unsafe { malloc(100) };
            assert!(!q.is_null());
            assert_eq!(unsafe { malloc_usable_size(q) }, 112);
            unsafe { free(q) };
        })
        .join()
        .unwrap();

        // And this thread's region survived the sibling's traffic.
        assert_eq!(malloc_usable_size(p), 100);
        region_end();
    }
}

#[test]
fn test_region_calloc_zeroes_recycled_blocks() {
    unsafe {
        region_begin(false, false, true, true, false, 24);
        // Dirty a block and return it to the freelist.
        let dirty = malloc(24).cast::<u8>();
        ptr::write_bytes(dirty, 0xFF, 24);
        free(dirty.cast());
        // calloc must hand back zeroed bytes even when it reuses the
        // dirty block.
        let clean = calloc(3, 8).cast::<u8>();
        assert!(!clean.is_null());
        let bytes = std::slice::from_raw_parts(clean, 24);
        assert!(bytes.iter().all(|&b| b == 0));
        region_end();
    }
}

#[test]
fn test_region_realloc_copies_stored_size() {
    unsafe {
        begin_bump_with_sizes();
        let p = malloc(50).cast::<u8>();
        ptr::write_bytes(p, 0x5E, 50);
        let grown = realloc(p.cast(), 400).cast::<u8>();
        assert!(!grown.is_null());
        assert_eq!(malloc_usable_size(grown.cast()), 400);
        let bytes = std::slice::from_raw_parts(grown, 50);
        assert!(bytes.iter().all(|&b| b == 0x5E));
        region_end();
    }
}

#[test]
fn test_region_memalign_is_best_effort() {
    unsafe {
        begin_bump_with_sizes();
        // Region-mode memalign forwards to the plain path: usable, but
        // only default alignment is promised.
        let p = memalign(64, 100);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        assert_eq!(malloc_usable_size(p), 100);
        region_end();
    }
}

#[test]
fn test_repeated_begin_replaces_lifecycle() {
    unsafe {
        begin_bump_with_sizes();
        assert!(!malloc(1_000).is_null());
        let held = with_mode(|mode| mode.bytes_held());
        assert!(held > 0);

        // Nesting is unsupported; a second begin releases the first
        // lifecycle and installs the new configuration.
        region_begin(false, false, true, true, false, 32);
        let p = malloc(32);
        assert!(!p.is_null());
        assert_eq!(malloc_usable_size(p), 32);
        free(p);
        region_end();
        assert_eq!(with_mode(|mode| mode.bytes_held()), 0);
    }
}

#[test]
fn test_region_end_without_begin_is_noop() {
    unsafe { region_end() };
    assert!(!with_mode(|mode| mode.is_active()));
    // Normal allocation still works.
    let p = unsafe { malloc(64) };
    assert!(!p.is_null());
    unsafe { free(p) };
}

#[test]
fn test_oversized_region_request_succeeds() {
    unsafe {
        begin_bump_with_sizes();
        // Far larger than the default chunk: the refill sizes the arena
        // to fit.
        let size = 8 << 20;
        let p = malloc(size);
        assert!(!p.is_null());
        assert_eq!(malloc_usable_size(p), size);
        ptr::write_bytes(p.cast::<u8>(), 0x9D, size);
        region_end();
    }
    assert_eq!(with_mode(|mode| mode.bytes_held()), 0);
}

#[test]
fn test_misconfigured_region_begin_is_refused() {
    // Neither disable_free nor same_size: no discipline selected. In
    // release builds the call is ignored; debug builds assert. This test
    // only runs the release-shaped path meaningfully, so gate on it.
    if cfg!(debug_assertions) {
        return;
    }
    unsafe {
        region_begin(false, false, true, false, false, 0);
        assert!(!with_mode(|mode| mode.is_active()));
        let p = malloc(100);
        assert_eq!(malloc_usable_size(p), 112);
        free(p);
    }
}
