//! Process-wide allocator singleton.
//!
//! One [`Heap`] lives in a `static` behind a mutex; every function here
//! locks it, performs exactly one heap operation, and unlocks on return.
//! That single lock is the entire concurrency story: operations from all
//! threads serialize into one total order, and the heap's invariants hold
//! at every lock boundary.
//!
//! The functions mirror the [`Heap`] methods one-to-one, for callers that
//! want a drop-in, C-style allocation interface instead of threading a
//! `Heap` value through their code.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::{AllocatorConfig, Protection};
use crate::error::AllocatorError;
use crate::heap::{Heap, MemoryRegion};
use crate::stats::AllocatorStats;

static HEAP: Mutex<Heap> = Mutex::new(Heap::new());

/// Acquires the singleton. A thread that panicked while holding the lock
/// poisons it; the heap's bookkeeping is either fully updated or untouched
/// at every panic site, so the poison is cleared and the state reused.
fn heap() -> MutexGuard<'static, Heap> {
  HEAP.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initializes the process-wide allocator.
///
/// Fails with [`AllocatorError::AlreadyInitialized`] if called twice
/// without an intervening [`allocator_cleanup`].
pub fn allocator_init(config: AllocatorConfig) -> Result<(), AllocatorError> {
  heap().init(config)
}

/// Allocates at least `size` writable bytes from the process-wide heap.
/// Null on zero size, uninitialized allocator, or exhaustion.
pub fn mem_alloc(size: usize) -> *mut u8 {
  heap().alloc(size)
}

/// Allocates `size` bytes at an address that is a multiple of `alignment`
/// (a nonzero power of two). Release with [`mem_free_aligned`].
pub fn mem_alloc_aligned(
  size: usize,
  alignment: usize,
) -> *mut u8 {
  heap().alloc_aligned(size, alignment)
}

/// Releases a pointer from [`mem_alloc`] or [`mem_realloc`]. Null and
/// unknown pointers are ignored.
///
/// # Safety
///
/// The payload must not be accessed after this call.
pub unsafe fn mem_free(user_ptr: *mut u8) {
  unsafe { heap().free(user_ptr) }
}

/// Releases a pointer from [`mem_alloc_aligned`].
///
/// # Safety
///
/// `user_ptr` must be null or exactly a live pointer returned by
/// [`mem_alloc_aligned`].
pub unsafe fn mem_free_aligned(user_ptr: *mut u8) {
  unsafe { heap().free_aligned(user_ptr) }
}

/// Resizes an allocation; see [`Heap::realloc`] for the branch semantics.
///
/// # Safety
///
/// `user_ptr` must be null or a live pointer from this allocator, and must
/// not be accessed after a successful call.
pub unsafe fn mem_realloc(
  user_ptr: *mut u8,
  size: usize,
) -> *mut u8 {
  unsafe { heap().realloc(user_ptr, size) }
}

/// Changes the protection of the pages covering `[user_ptr, user_ptr +
/// size)`; see [`Heap::protect`].
///
/// # Safety
///
/// Revoking access from pages the allocator's own headers live on makes
/// later operations fault until access is restored.
pub unsafe fn mem_protect(
  user_ptr: *mut u8,
  size: usize,
  protection: Protection,
) -> Result<(), AllocatorError> {
  unsafe { heap().protect(user_ptr, size, protection) }
}

/// Snapshot of the allocator counters, taken under the lock. All zeros
/// when the allocator is not initialized.
pub fn allocator_stats() -> AllocatorStats {
  heap().stats()
}

/// Address-ordered snapshot of every block on either list.
pub fn allocator_memory_map() -> Vec<MemoryRegion> {
  heap().memory_map()
}

/// Prints the counters and the block table to stdout. Diagnostic only.
pub fn allocator_print_memory_map() {
  heap().print_memory_map()
}

/// Unmaps every region the allocator obtained from the OS and resets the
/// singleton. Idempotent; the allocator can be initialized again
/// afterwards.
pub fn allocator_cleanup() {
  heap().cleanup()
}
