//! ABI layer for the malloc-replacement contract.
//!
//! Each entry point dispatches on the calling thread's mode state: while
//! a region is active the request is served by the thread's private
//! sub-allocators (bump or same-size freelist, per the configured
//! discipline); otherwise it goes to the shared general-purpose heap.
//!
//! Failure semantics follow the standard allocator contract: exhaustion
//! returns null, and misuse (freeing under the wrong discipline, querying
//! size without size support) is undefined behavior by contract rather
//! than a checked error.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use fleetalloc_core::policy::RegionDiscipline;
use fleetalloc_core::telemetry::{self, LogLevel};
use fleetalloc_core::with_mode;
use fleetalloc_layers::header::ObjectHeader;

use crate::heap_state::process_heap;

#[inline]
fn oom(symbol: &'static str, size: usize) -> *mut c_void {
    telemetry::record(LogLevel::Warn, symbol, "oom", "null", Some(size));
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// POSIX `malloc` -- allocates `size` bytes of uninitialized memory.
///
/// In region mode the request is served by the thread's region
/// sub-allocator; otherwise by the shared heap. Returns null on
/// exhaustion.
///
/// # Safety
///
/// Callers outside an active bump-discipline region must eventually
/// `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    let routed = with_mode(|mode| {
        if mode.is_active() {
            Some(mode.allocate(size))
        } else {
            None
        }
    });
    match routed {
        Some(Some(ptr)) => ptr.as_ptr().cast(),
        Some(None) => oom("malloc", size),
        None => match process_heap().allocate(size) {
            Some(ptr) => ptr.as_ptr().cast(),
            None => oom("malloc", size),
        },
    }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// POSIX `free` -- releases memory from `malloc`/`calloc`/`realloc`.
///
/// Null is a no-op. Under an active bump-discipline region this is a
/// no-op by contract (the region reclaims en masse at `region_end`);
/// under the same-size discipline the block returns to the thread's
/// freelist.
///
/// # Safety
///
/// `ptr` must be null or a live allocation obtained from the currently
/// routing discipline on this thread.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };
    let handled = with_mode(|mode| {
        if !mode.is_active() {
            return false;
        }
        match mode.config().discipline {
            RegionDiscipline::Bump => {}
            RegionDiscipline::SameSizeFreelist => {
                // SAFETY: caller contract — the pointer came from this
                // thread's active same-size region.
                unsafe { mode.freelist_mut().deallocate(ptr) };
            }
        }
        true
    });
    if !handled {
        // SAFETY: caller contract — the pointer came from the shared heap.
        unsafe { process_heap().deallocate(ptr) };
    }
}

/// C23 `free_sized` -- the size hint is ignored and forwarded to `free`.
///
/// # Safety
///
/// Same contract as [`free`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free_sized(ptr: *mut c_void, _size: usize) {
    // SAFETY: forwarded contract.
    unsafe { free(ptr) }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// POSIX `calloc` -- zeroed array allocation with overflow checking.
///
/// # Safety
///
/// Same ownership contract as [`malloc`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        telemetry::record(
            LogLevel::Warn,
            "calloc",
            "overflow",
            "null",
            Some(size),
        );
        return ptr::null_mut();
    };
    let total = total.max(1);
    // SAFETY: plain allocation entry.
    let out = unsafe { malloc(total) };
    if !out.is_null() {
        // SAFETY: a successful malloc(total) is writable for total bytes.
        unsafe { ptr::write_bytes(out.cast::<u8>(), 0, total) };
    }
    out
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// POSIX `realloc` -- resizes an allocation.
///
/// Null behaves as `malloc(size)`; zero size behaves as `free(ptr)` and
/// returns null. Otherwise allocate-copy-free, copying
/// `min(old usable size, size)` bytes.
///
/// # Safety
///
/// `ptr` must be null or a live allocation from the currently routing
/// discipline. In region mode the old size is recovered the same way
/// `malloc_usable_size` recovers it, so a region without size support
/// must not be realloc'ed from.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: plain allocation entry.
        return unsafe { malloc(size) };
    }
    if size == 0 {
        // SAFETY: forwarded free contract.
        unsafe { free(ptr) };
        return ptr::null_mut();
    }
    // SAFETY: ptr is a live allocation per the caller contract.
    let old_usable = unsafe { malloc_usable_size(ptr) };
    // SAFETY: plain allocation entry.
    let out = unsafe { malloc(size) };
    if out.is_null() {
        return ptr::null_mut();
    }
    let copy = old_usable.min(size);
    // SAFETY: both blocks are valid for `copy` bytes and distinct.
    unsafe {
        ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.cast::<u8>(), copy);
        free(ptr);
    }
    out
}

// ---------------------------------------------------------------------------
// malloc_usable_size
// ---------------------------------------------------------------------------

/// `malloc_usable_size` -- usable bytes behind `ptr`; zero for null.
///
/// In an active region this is the configured fixed size when one was
/// declared, otherwise the requested size stored in the object header.
/// Outside region mode it is the size-class-derived upper bound.
///
/// # Safety
///
/// `ptr` must be null or a live allocation. Querying a region pointer
/// allocated without size support is undefined behavior by contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return 0;
    };
    let routed = with_mode(|mode| {
        if !mode.is_active() {
            return None;
        }
        let config = mode.config();
        if let Some(one_size) = config.one_size {
            return Some(one_size);
        }
        debug_assert!(config.size_taken, "size query without size support");
        // SAFETY: size_taken regions install a header on every pointer.
        Some(unsafe { ObjectHeader::recover(ptr) })
    });
    // SAFETY: shared-heap pointers carry block headers.
    routed.unwrap_or_else(|| unsafe { process_heap().usable_size(ptr) })
}

// ---------------------------------------------------------------------------
// memalign family
// ---------------------------------------------------------------------------

/// Legacy `memalign` -- allocates `size` bytes aligned to `alignment`.
///
/// In region mode alignment beyond the default is best-effort: the call
/// forwards to the plain allocation path (a known limitation of the
/// region discipline). Outside region mode the shared heap honors the
/// alignment exactly.
///
/// # Safety
///
/// Same ownership contract as [`malloc`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        return ptr::null_mut();
    }
    let active = with_mode(|mode| mode.is_active());
    if active {
        // TODO: pad the bump cursor so regions can honor alignments
        // beyond the default instead of falling back to plain malloc.
        // SAFETY: plain allocation entry.
        return unsafe { malloc(size) };
    }
    match process_heap().allocate_aligned(alignment, size) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => oom("memalign", size),
    }
}

/// POSIX `posix_memalign` -- aligned allocation with an error-code
/// return. `alignment` must be a power of two multiple of the pointer
/// size.
///
/// # Safety
///
/// `memptr` must point to writable storage for one pointer.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if !alignment.is_power_of_two() || !alignment.is_multiple_of(size_of::<usize>()) {
        return libc::EINVAL;
    }
    // SAFETY: validated alignment; memalign handles routing.
    let out = unsafe { memalign(alignment, size) };
    if out.is_null() {
        return libc::ENOMEM;
    }
    // SAFETY: caller guarantees memptr is writable.
    unsafe { *memptr = out };
    0
}

/// C11 `aligned_alloc` -- `size` must be a multiple of `alignment`.
///
/// # Safety
///
/// Same ownership contract as [`malloc`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() || !size.is_multiple_of(alignment) {
        return ptr::null_mut();
    }
    // SAFETY: validated arguments; memalign handles routing.
    unsafe { memalign(alignment, size) }
}

// ---------------------------------------------------------------------------
// lock coordination hooks
// ---------------------------------------------------------------------------

/// Acquires the shared heap's lock and holds it, so a host runtime can
/// take a consistent heap snapshot (fork coordination).
///
/// # Safety
///
/// Must be paired with [`malloc_unlock`] on the same thread of control;
/// allocation on the locked heap deadlocks until then.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_lock() {
    process_heap().acquire();
}

/// Releases the lock taken by [`malloc_lock`].
///
/// # Safety
///
/// Must pair with a prior [`malloc_lock`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_unlock() {
    // SAFETY: caller pairs this with malloc_lock.
    unsafe { process_heap().release() }
}
