//! # Free-list heap manager
//!
//! The heap serves variable-size allocations out of anonymous page
//! mappings obtained from the OS. Every managed region is prefixed by a
//! [`Block`] header, and two intrusive lists are threaded through those
//! headers: the free list (kept sorted by address) and the used list.
//!
//! ## Memory layout
//!
//! ```text
//!   One mapping, after a few allocations:
//!
//!   ┌─────────┬─────────┬─────────┬───────────────────────────────┐
//!   │ hdr│ A  │ hdr│ B  │ hdr│ C  │ hdr│     free tail            │
//!   └─────────┴─────────┴─────────┴───────────────────────────────┘
//!   ▲         ▲                   ▲
//!   │         └ block boundaries: base + size of the previous block
//!   └ mapping base (page-aligned)
//!
//!   free list (address order):  [free tail]
//!   used list:                  [C] -> [B] -> [A]
//! ```
//!
//! ## Allocation walk
//!
//! ```text
//!   alloc(size):
//!     total = word-aligned(size) + header
//!     scan free list per strategy ──► none? map fresh pages, page-rounded
//!     split the chosen block if the surplus fits header + 16 bytes
//!     move it to the used list, bump the counters
//!     return block + header
//! ```
//!
//! Freeing reverses the move and then coalesces: because the free list is
//! address-ordered, any two list neighbors whose byte ranges touch are
//! in-memory neighbors and are fused on the spot.
//!
//! The type itself is not synchronized; the process-wide `mem_*` and
//! `allocator_*` wrappers put a mutex in front of it.

use std::{mem, ptr};

use crate::block::{Block, BlockList, HEADER_SIZE};
use crate::config::{AllocatorConfig, Protection};
use crate::error::AllocatorError;
use crate::stats::AllocatorStats;
use crate::{align, align_to, os};

/// A split only happens when the surplus can hold a header plus this many
/// payload bytes; smaller surpluses stay with the allocation as internal
/// fragmentation.
const MIN_SPLIT_PAYLOAD: usize = 16;

/// One region obtained from the OS. Tracked so cleanup can return every
/// mapping, not just the initial one.
struct Mapping {
  addr: *mut u8,
  len: usize,
}

/// Snapshot of a single block as reported by [`Heap::memory_map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
  /// Address of the block header.
  pub start_addr: usize,
  /// Total block length in bytes, header included.
  pub size: usize,
  /// Protection recorded in the header.
  pub protection: Protection,
  /// Whether the block is on the free list.
  pub is_free: bool,
}

/// The heap manager.
///
/// Operations take an explicit receiver, so independent heaps can exist in
/// tests; the process-wide singleton wraps one `Heap` in a mutex and
/// mirrors this API as the crate's free functions.
///
/// All bookkeeping lives in ordinary fields; the only memory the heap does
/// not own through Rust types is the mapped pool itself, reached through
/// raw block pointers. Dropping the heap returns every mapping to the OS.
pub struct Heap {
  /// Base of the initial mapping.
  heap_start: *mut u8,
  /// Length of the initial mapping.
  heap_size: usize,
  /// Page size resolved at init: configured value or the OS answer.
  page_size: usize,
  /// Configuration captured at init.
  config: AllocatorConfig,
  /// Free blocks, sorted by address.
  free_list: BlockList,
  /// Used blocks, most recently allocated first.
  used_list: BlockList,
  /// Every region obtained from the OS, released in bulk at cleanup.
  mappings: Vec<Mapping>,
  /// Monotone false -> true -> false across init/cleanup.
  initialized: bool,
  /// Aggregate counters; see [`AllocatorStats`].
  stats: AllocatorStats,
}

// Safety: the raw block pointers only reach other threads through the
// global mutex wrapper; the heap itself is always accessed via &mut.
unsafe impl Send for Heap {}

impl Heap {
  /// Creates an uninitialized heap. No memory is mapped until
  /// [`init`](Self::init).
  pub const fn new() -> Self {
    Self {
      heap_start: ptr::null_mut(),
      heap_size: 0,
      page_size: 0,
      config: AllocatorConfig::new(),
      free_list: BlockList::new(),
      used_list: BlockList::new(),
      mappings: Vec::new(),
      initialized: false,
      stats: AllocatorStats::new(),
    }
  }

  /// Maps the initial pool and installs it as one spanning free block.
  ///
  /// Fails without side effects if the heap is already initialized or the
  /// OS refuses the mapping. A `page_size` of zero in the configuration
  /// means "ask the OS".
  pub fn init(
    &mut self,
    config: AllocatorConfig,
  ) -> Result<(), AllocatorError> {
    if self.initialized {
      return Err(AllocatorError::AlreadyInitialized);
    }

    let page_size = if config.page_size == 0 {
      os::page_size()
    } else {
      config.page_size
    };

    let heap_size = round_up_to_page_size(config.initial_heap_size, page_size);
    let heap_start = os::map_pages(heap_size).map_err(AllocatorError::MapFailed)?;

    // Safety: the mapping is fresh, writable, and page-aligned, so the
    // header write is in bounds and aligned.
    let initial_block = unsafe { Block::init_at(heap_start, heap_size, Protection::READ_WRITE) };

    self.heap_start = heap_start;
    self.heap_size = heap_size;
    self.page_size = page_size;
    self.config = config;
    self.free_list = BlockList::new();
    self.used_list = BlockList::new();
    unsafe { self.free_list.push_front(initial_block) };
    self.mappings.push(Mapping {
      addr: heap_start,
      len: heap_size,
    });
    self.initialized = true;

    self.stats = AllocatorStats {
      total_memory: heap_size,
      free_memory: heap_size,
      overhead: HEADER_SIZE,
      ..AllocatorStats::new()
    };

    log::debug!(
      "heap initialized: {} bytes at {:p}, page size {}, strategy {:?}",
      heap_size,
      heap_start,
      page_size,
      config.strategy,
    );

    Ok(())
  }

  /// Allocates at least `size` writable bytes.
  ///
  /// Returns null on zero size, uninitialized state, or exhaustion (no
  /// fitting free block and the OS refused more pages). The returned
  /// pointer is word-aligned and points just past the block header.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 || !self.initialized {
      return ptr::null_mut();
    }
    // Rust objects cannot exceed isize::MAX bytes; rejecting here also
    // keeps the size arithmetic below overflow-free.
    if size >= isize::MAX as usize {
      return ptr::null_mut();
    }

    let total_size = total_block_size(size);

    unsafe {
      let mut block = self.find_free_block(total_size);

      if block.is_null() {
        block = match self.extend_heap(total_size) {
          Ok(block) => block,
          Err(err) => {
            log::debug!("alloc({size}) failed: {err}");
            return ptr::null_mut();
          }
        };
      }

      self.split_block(block, total_size);
      self.mark_block_used(block);
      self.update_fragmentation_ratio();

      let payload = Block::payload(block);
      log::trace!("alloc({size}) -> {payload:p}");
      payload
    }
  }

  /// Allocates `size` bytes whose address is a multiple of `alignment`.
  ///
  /// `alignment` must be a nonzero power of two; otherwise null is
  /// returned. The block is over-allocated by `alignment` plus one pointer
  /// width, and the pointer the normal path returned is stashed in the
  /// word just below the aligned address:
  ///
  /// ```text
  ///   ┌────────┬─────────────┬──────────────┬──────────────────────┐
  ///   │ header │   slack     │ original ptr │   aligned payload    │
  ///   └────────┴─────────────┴──────────────┴──────────────────────┘
  ///   ▲        ▲                            ▲
  ///   │        └ alloc() returned this      └ returned to the user
  ///   └ block                                 (multiple of alignment)
  /// ```
  ///
  /// Pointers from this path must be released with
  /// [`free_aligned`](Self::free_aligned), which follows the stash back to
  /// the real allocation.
  pub fn alloc_aligned(
    &mut self,
    size: usize,
    alignment: usize,
  ) -> *mut u8 {
    if size == 0 || !self.initialized {
      return ptr::null_mut();
    }
    if alignment == 0 || !alignment.is_power_of_two() {
      return ptr::null_mut();
    }

    let stash = mem::size_of::<*mut u8>();
    let Some(padded) = size
      .checked_add(alignment)
      .and_then(|s| s.checked_add(stash))
    else {
      return ptr::null_mut();
    };

    let raw = self.alloc(padded);
    if raw.is_null() {
      return ptr::null_mut();
    }

    let aligned_addr = align_to!(raw as usize + stash, alignment);

    // Safety: aligned_addr - stash lies within the padded allocation, at
    // or above raw. The stash word may itself be unaligned for small
    // alignments, hence the unaligned write.
    unsafe {
      ((aligned_addr - stash) as *mut *mut u8).write_unaligned(raw);
    }

    aligned_addr as *mut u8
  }

  /// Releases a pointer previously returned by [`alloc`](Self::alloc) or
  /// [`realloc`](Self::realloc).
  ///
  /// Null is a no-op. A pointer that is not the start of a live allocation
  /// fails the used-list membership scan and is logged and ignored; the
  /// scan compares addresses only, so nothing is dereferenced until the
  /// pointer is known to be ours.
  ///
  /// # Safety
  ///
  /// The payload must not be accessed after this call.
  pub unsafe fn free(
    &mut self,
    user_ptr: *mut u8,
  ) {
    if user_ptr.is_null() || !self.initialized {
      return;
    }

    let block = Block::from_payload(user_ptr);

    unsafe {
      if !self.used_list.contains(block) {
        log::warn!("free of unknown pointer {user_ptr:p} ignored");
        return;
      }

      self.mark_block_free(block);
      self.merge_free_blocks();
      self.update_fragmentation_ratio();
    }

    log::trace!("free({user_ptr:p})");
  }

  /// Releases a pointer previously returned by
  /// [`alloc_aligned`](Self::alloc_aligned).
  ///
  /// # Safety
  ///
  /// `user_ptr` must be null or exactly a live pointer from
  /// `alloc_aligned`; the stash word below it is read to recover the real
  /// allocation, so an arbitrary pointer here reads arbitrary memory.
  pub unsafe fn free_aligned(
    &mut self,
    user_ptr: *mut u8,
  ) {
    if user_ptr.is_null() || !self.initialized {
      return;
    }

    unsafe {
      let stash = (user_ptr as usize - mem::size_of::<*mut u8>()) as *mut *mut u8;
      let original = stash.read_unaligned();
      self.free(original);
    }
  }

  /// Resizes an allocation, preserving its payload prefix.
  ///
  /// - null `user_ptr` behaves as [`alloc`](Self::alloc);
  /// - zero `size` behaves as [`free`](Self::free) and returns null;
  /// - shrinking splits in place and returns the same pointer;
  /// - growing absorbs the in-memory successor when it is free and large
  ///   enough, again returning the same pointer;
  /// - otherwise the payload moves to a fresh allocation and the old block
  ///   is freed.
  ///
  /// # Safety
  ///
  /// `user_ptr` must be null or a live pointer from this heap. On success
  /// the old pointer must no longer be accessed (it may have moved).
  pub unsafe fn realloc(
    &mut self,
    user_ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if user_ptr.is_null() {
      return self.alloc(size);
    }
    if size == 0 {
      unsafe { self.free(user_ptr) };
      return ptr::null_mut();
    }
    if !self.initialized || size >= isize::MAX as usize {
      return ptr::null_mut();
    }

    let block = Block::from_payload(user_ptr);

    unsafe {
      if !self.used_list.contains(block) {
        log::warn!("realloc of unknown pointer {user_ptr:p} ignored");
        return ptr::null_mut();
      }

      let total_size = total_block_size(size);

      // Shrink in place: carve the surplus back into the free list. The
      // carved tail may now touch a free neighbor, so coalesce.
      if total_size <= (*block).size {
        self.split_block(block, total_size);
        self.merge_free_blocks();
        self.update_fragmentation_ratio();
        return user_ptr;
      }

      // Grow in place: absorb the in-memory successor if it is free.
      let next = self.free_block_at(Block::end_addr(block));
      if !next.is_null() && (*block).size + (*next).size >= total_size {
        let absorbed = (*next).size;
        self.free_list.remove(next);
        (*block).size += absorbed;

        self.stats.used_memory += absorbed;
        self.stats.free_memory -= absorbed;

        self.split_block(block, total_size);

        if self.stats.used_memory > self.stats.peak_usage {
          self.stats.peak_usage = self.stats.used_memory;
        }
        self.update_fragmentation_ratio();
        log::trace!("realloc({user_ptr:p}, {size}) grew in place");
        return user_ptr;
      }

      // Relocate: fresh allocation, copy the surviving prefix, release
      // the old block.
      let old_payload = (*block).size - HEADER_SIZE;
      let new_ptr = self.alloc(size);
      if new_ptr.is_null() {
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(user_ptr, new_ptr, old_payload.min(size));
      self.free(user_ptr);

      log::trace!("realloc({user_ptr:p}, {size}) relocated to {new_ptr:p}");
      new_ptr
    }
  }

  /// Applies `protection` to the pages covering `[user_ptr, user_ptr +
  /// size)` and records it in the block header.
  ///
  /// The range is widened to page boundaries, so neighboring blocks on the
  /// same pages change protection with it; that is inherent to page-granular
  /// protection over a packed heap.
  ///
  /// # Safety
  ///
  /// Revoking read or write access from a block whose header shares the
  /// affected pages makes subsequent allocator operations on those blocks
  /// fault; the caller is responsible for restoring access before the
  /// memory is touched again.
  pub unsafe fn protect(
    &mut self,
    user_ptr: *mut u8,
    size: usize,
    protection: Protection,
  ) -> Result<(), AllocatorError> {
    if !self.initialized {
      return Err(AllocatorError::Uninitialized);
    }
    if user_ptr.is_null() || size == 0 {
      return Err(AllocatorError::InvalidArgument);
    }

    let block = Block::from_payload(user_ptr);

    unsafe {
      if !self.used_list.contains(block) {
        return Err(AllocatorError::UnknownPointer);
      }

      let addr = user_ptr as usize;
      let page_addr = addr - (addr % self.page_size);
      let span = round_up_to_page_size(size + (addr - page_addr), self.page_size);

      os::set_page_protection(page_addr as *mut u8, span, protection)
        .map_err(AllocatorError::ProtectFailed)?;

      (*block).protection = protection;
    }

    Ok(())
  }

  /// Snapshot of the aggregate counters; all zeros when uninitialized.
  pub fn stats(&self) -> AllocatorStats {
    if self.initialized {
      self.stats
    } else {
      AllocatorStats::new()
    }
  }

  /// Collects every block from both lists, sorted by address.
  pub fn memory_map(&self) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();

    if !self.initialized {
      return regions;
    }

    unsafe {
      for list in [&self.free_list, &self.used_list] {
        let mut current = list.head();
        while !current.is_null() {
          regions.push(MemoryRegion {
            start_addr: current as usize,
            size: (*current).size,
            protection: (*current).protection,
            is_free: (*current).is_free,
          });
          current = (*current).next;
        }
      }
    }

    regions.sort_by_key(|region| region.start_addr);
    regions
  }

  /// Prints the counters and an address-ordered table of every block.
  /// Purely diagnostic; allocator state is not touched.
  pub fn print_memory_map(&self) {
    if !self.initialized {
      println!("Allocator not initialized");
      return;
    }

    println!("===== Memory Allocator Map =====");
    println!("{}", self.stats);
    println!();
    println!("Address            | Size     | Status | Protection");
    println!("-------------------|----------|--------|-----------");

    for region in self.memory_map() {
      println!(
        "{:#018x} | {:<8} | {:<6} | {}",
        region.start_addr,
        region.size,
        if region.is_free { "FREE" } else { "USED" },
        region.protection,
      );
    }

    println!("================================");
  }

  /// Returns every mapping to the OS and resets the heap to its
  /// uninitialized state. Safe to call repeatedly.
  pub fn cleanup(&mut self) {
    if !self.initialized {
      return;
    }

    log::debug!(
      "cleaning up: initial mapping {:p} ({} bytes), {} mappings total",
      self.heap_start,
      self.heap_size,
      self.mappings.len(),
    );

    for mapping in self.mappings.drain(..) {
      // Safety: each entry is a mapping we created and nothing hands out
      // pointers into it past this point.
      unsafe { os::unmap_pages(mapping.addr, mapping.len) };
    }

    self.heap_start = ptr::null_mut();
    self.heap_size = 0;
    self.page_size = 0;
    self.free_list = BlockList::new();
    self.used_list = BlockList::new();
    self.initialized = false;
    self.stats = AllocatorStats::new();
  }

  /// Finds a free block of at least `total_size` bytes per the configured
  /// strategy, or null.
  unsafe fn find_free_block(
    &self,
    total_size: usize,
  ) -> *mut Block {
    use crate::config::Strategy;

    unsafe {
      let mut current = self.free_list.head();

      match self.config.strategy {
        Strategy::FirstFit => {
          while !current.is_null() {
            if (*current).is_free && (*current).size >= total_size {
              return current;
            }
            current = (*current).next;
          }

          ptr::null_mut()
        }

        Strategy::BestFit => {
          let mut best: *mut Block = ptr::null_mut();
          let mut smallest_diff = usize::MAX;

          while !current.is_null() {
            if (*current).is_free && (*current).size >= total_size {
              let diff = (*current).size - total_size;
              if diff < smallest_diff {
                smallest_diff = diff;
                best = current;
              }
            }
            current = (*current).next;
          }

          best
        }

        Strategy::WorstFit => {
          let mut worst: *mut Block = ptr::null_mut();
          let mut largest_diff = 0;

          while !current.is_null() {
            if (*current).is_free && (*current).size >= total_size {
              let diff = (*current).size - total_size;
              if worst.is_null() || diff > largest_diff {
                largest_diff = diff;
                worst = current;
              }
            }
            current = (*current).next;
          }

          worst
        }
      }
    }
  }

  /// Carves the surplus of `block` beyond `total_size` into a new free
  /// block, if the surplus can hold a header plus [`MIN_SPLIT_PAYLOAD`]
  /// bytes. The tail inherits the parent's protection and joins the free
  /// list in address order. Splitting a used block (realloc shrink) moves
  /// the carved bytes from the used to the free counters.
  unsafe fn split_block(
    &mut self,
    block: *mut Block,
    total_size: usize,
  ) {
    unsafe {
      if (*block).size < total_size + HEADER_SIZE + MIN_SPLIT_PAYLOAD {
        return;
      }

      let tail = Block::init_at(
        (block as *mut u8).add(total_size),
        (*block).size - total_size,
        (*block).protection,
      );
      (*block).size = total_size;

      self.free_list.insert_by_address(tail);

      if !(*block).is_free {
        self.stats.used_memory -= (*tail).size;
        self.stats.free_memory += (*tail).size;
      }
    }
  }

  /// Fuses free-list neighbors whose byte ranges touch. Because the free
  /// list is address-ordered, one pass restores the invariant that no two
  /// address-adjacent blocks are both free.
  unsafe fn merge_free_blocks(&mut self) {
    unsafe {
      let mut current = self.free_list.head();

      while !current.is_null() {
        let next = (*current).next;
        if next.is_null() {
          break;
        }

        if Block::end_addr(current) == next as usize {
          (*current).size += (*next).size;
          self.free_list.remove(next);
          // Stay on `current`; it may now touch the following block too.
        } else {
          current = next;
        }
      }
    }
  }

  /// Maps fresh pages for a request no existing free block can satisfy.
  /// The new region becomes one free block and need not be contiguous
  /// with any earlier mapping.
  unsafe fn extend_heap(
    &mut self,
    total_size: usize,
  ) -> Result<*mut Block, AllocatorError> {
    let aligned_size = round_up_to_page_size(total_size, self.page_size);
    let addr = os::map_pages(aligned_size).map_err(AllocatorError::MapFailed)?;

    // Safety: fresh writable mapping, page-aligned.
    let block = unsafe { Block::init_at(addr, aligned_size, Protection::READ_WRITE) };
    unsafe { self.free_list.insert_by_address(block) };

    self.mappings.push(Mapping {
      addr,
      len: aligned_size,
    });
    self.stats.total_memory += aligned_size;
    self.stats.free_memory += aligned_size;

    log::debug!("heap extended by {aligned_size} bytes at {addr:p}");

    Ok(block)
  }

  /// Moves `block` from the free list to the used list and updates the
  /// counters.
  unsafe fn mark_block_used(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      self.free_list.remove(block);
      self.used_list.push_front(block);
      (*block).is_free = false;

      self.stats.used_memory += (*block).size;
      self.stats.free_memory -= (*block).size;
      self.stats.active_allocations += 1;
      self.stats.total_allocations += 1;

      if self.stats.used_memory > self.stats.peak_usage {
        self.stats.peak_usage = self.stats.used_memory;
      }
    }
  }

  /// Moves `block` from the used list back to the free list (in address
  /// order) and updates the counters.
  unsafe fn mark_block_free(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      self.used_list.remove(block);
      self.free_list.insert_by_address(block);
      (*block).is_free = true;

      self.stats.used_memory -= (*block).size;
      self.stats.free_memory += (*block).size;
      self.stats.active_allocations -= 1;
    }
  }

  /// Returns the free block whose header sits exactly at `addr`, or null.
  unsafe fn free_block_at(
    &self,
    addr: usize,
  ) -> *mut Block {
    unsafe {
      let mut current = self.free_list.head();

      while !current.is_null() {
        if current as usize == addr {
          return current;
        }
        current = (*current).next;
      }

      ptr::null_mut()
    }
  }

  /// Recomputes `1 − largest_free / free_memory`; zero with no free bytes.
  fn update_fragmentation_ratio(&mut self) {
    if self.stats.free_memory == 0 {
      self.stats.fragmentation_ratio = 0.0;
      return;
    }

    let mut largest = 0usize;

    unsafe {
      let mut current = self.free_list.head();
      while !current.is_null() {
        if (*current).size > largest {
          largest = (*current).size;
        }
        current = (*current).next;
      }
    }

    self.stats.fragmentation_ratio = 1.0 - (largest as f64 / self.stats.free_memory as f64);
  }
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    self.cleanup();
  }
}

/// Header-inclusive block size for a user request. The payload size is
/// word-aligned first, so every split boundary (and therefore every
/// header) stays word-aligned.
fn total_block_size(size: usize) -> usize {
  align!(size) + HEADER_SIZE
}

/// Rounds `size` up to a multiple of `page_size`. Division-based, so a
/// configured page size need not be a power of two.
fn round_up_to_page_size(
  size: usize,
  page_size: usize,
) -> usize {
  size.div_ceil(page_size) * page_size
}
