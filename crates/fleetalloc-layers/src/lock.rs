//! Thread-safety wrappers.
//!
//! [`LockedHeap`] adds mutual exclusion around a non-thread-safe layer: a
//! spin lock is acquired on entry and released on exit of every call, and
//! raw `acquire`/`release` hooks are exposed so a host runtime can pin the
//! heap across operations that need a consistent snapshot (forking).
//!
//! [`SingleThreadHeap`] is the same surface with the lock omitted, for
//! single-threaded builds where the overhead is unwanted. Using it from
//! more than one thread is undefined behavior by contract.

use std::cell::UnsafeCell;
use std::ptr::NonNull;

use spin::Mutex;

use crate::heap::Heap;

/// Spin-locked wrapper: `&self` allocation surface over any [`Heap`].
pub struct LockedHeap<H> {
    inner: Mutex<H>,
}

impl<H: Heap> LockedHeap<H> {
    pub const fn new(heap: H) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    #[inline]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(size)
    }

    #[inline]
    pub fn allocate_aligned(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate_aligned(align, size)
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::deallocate`].
    #[inline]
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.lock().deallocate(ptr) }
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::usable_size`].
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: forwarded contract.
        unsafe { self.inner.lock().usable_size(ptr) }
    }

    /// Runs `f` with the inner heap under the lock (stats snapshots).
    pub fn with<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Acquires the heap lock and leaves it held. Coordination hook for
    /// hosts that must quiesce the heap (e.g. before `fork`).
    pub fn acquire(&self) {
        core::mem::forget(self.inner.lock());
    }

    /// Releases a lock held by [`LockedHeap::acquire`].
    ///
    /// # Safety
    ///
    /// Must pair with a prior `acquire` on this wrapper by the same
    /// thread of control.
    pub unsafe fn release(&self) {
        // SAFETY: caller pairs this with acquire.
        unsafe { self.inner.force_unlock() }
    }
}

/// Lock-free wrapper for single-threaded configurations.
///
/// The `Sync` implementation is a promise the embedder makes, not one the
/// type can enforce: the process must never call into the heap from two
/// threads.
pub struct SingleThreadHeap<H> {
    inner: UnsafeCell<H>,
}

// SAFETY: see the type-level contract; selected only by single-threaded
// builds.
unsafe impl<H> Sync for SingleThreadHeap<H> {}

impl<H: Heap> SingleThreadHeap<H> {
    pub const fn new(heap: H) -> Self {
        Self {
            inner: UnsafeCell::new(heap),
        }
    }

    #[allow(clippy::mut_from_ref)]
    #[inline]
    fn heap(&self) -> &mut H {
        // SAFETY: single-threaded contract; calls never re-enter the heap.
        unsafe { &mut *self.inner.get() }
    }

    #[inline]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.heap().allocate(size)
    }

    #[inline]
    pub fn allocate_aligned(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        self.heap().allocate_aligned(align, size)
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::deallocate`].
    #[inline]
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe { self.heap().deallocate(ptr) }
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::usable_size`].
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: forwarded contract.
        unsafe { self.heap().usable_size(ptr) }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(self.heap())
    }

    /// No lock to take; the hook exists so both wrappers expose the same
    /// surface.
    pub fn acquire(&self) {}

    /// # Safety
    ///
    /// Pairs with `acquire`; trivially safe here.
    pub unsafe fn release(&self) {}
}
