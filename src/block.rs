//! Block header and intrusive list primitives.
//!
//! Every region managed by the allocator is prefixed by a [`Block`] header
//! written in place at the start of the region; the header *is* the list
//! node. Two lists are threaded through these headers, a free list and a
//! used list, and a block lives on exactly one of them at any time.
//!
//! ```text
//!   ┌──────────────────┬─────────────────────────┐
//!   │   Block header   │      User payload       │
//!   ├──────────────────┼─────────────────────────┤
//!   │ size: usize      │                         │
//!   │ is_free: bool    │   size - header bytes   │
//!   │ protection       │                         │
//!   │ next, prev       │                         │
//!   └──────────────────┴─────────────────────────┘
//!   ▲                  ▲
//!   │                  └── pointer returned to the user
//!   └── block address (list node)
//! ```
//!
//! `size` counts the header plus the payload, so `block + size` is the
//! address where the next in-memory block would start.

use std::{mem, ptr};

use crate::config::Protection;

/// Size of the in-place header, in bytes.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Metadata stored at the start of every managed region.
#[repr(C)]
pub(crate) struct Block {
  /// Total length in bytes, header included.
  pub size: usize,
  /// Mirrors list membership: true iff the block is on the free list.
  pub is_free: bool,
  /// Protection recorded for the region; applied at page granularity.
  pub protection: Protection,
  /// Next block in the containing list.
  pub next: *mut Block,
  /// Previous block in the containing list.
  pub prev: *mut Block,
}

impl Block {
  /// Writes a fresh, unlinked header at `addr` and returns it.
  ///
  /// # Safety
  ///
  /// `addr` must be writable for at least `HEADER_SIZE` bytes and aligned
  /// for `Block`.
  pub unsafe fn init_at(
    addr: *mut u8,
    size: usize,
    protection: Protection,
  ) -> *mut Block {
    let block = addr as *mut Block;

    unsafe {
      block.write(Block {
        size,
        is_free: true,
        protection,
        next: ptr::null_mut(),
        prev: ptr::null_mut(),
      });
    }

    block
  }

  /// Address of the first payload byte, just past the header.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header inside a managed region.
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(HEADER_SIZE) }
  }

  /// Recovers the header address from a payload pointer.
  ///
  /// Pure address arithmetic; the result must be validated against the
  /// used list before it is dereferenced, since the caller may hand in a
  /// pointer this allocator never produced.
  pub fn from_payload(ptr: *mut u8) -> *mut Block {
    (ptr as usize).wrapping_sub(HEADER_SIZE) as *mut Block
  }

  /// One-past-the-end address of the block.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header.
  pub unsafe fn end_addr(block: *mut Block) -> usize {
    unsafe { block as usize + (*block).size }
  }
}

/// An intrusive doubly-linked list threaded through [`Block`] headers.
///
/// The list owns no memory; it only stitches together headers that live
/// inside the heap's mappings. All operations are O(1) except the ordered
/// insert and the scans, which are linear in the list length.
pub(crate) struct BlockList {
  head: *mut Block,
}

impl BlockList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  pub fn head(&self) -> *mut Block {
    self.head
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// Links `block` in as the new head.
  ///
  /// # Safety
  ///
  /// `block` must be a live, unlinked header not already on any list.
  pub unsafe fn push_front(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      (*block).prev = ptr::null_mut();
      (*block).next = self.head;

      if !self.head.is_null() {
        (*self.head).prev = block;
      }

      self.head = block;
    }
  }

  /// Links `block` in so that the list stays sorted by header address.
  ///
  /// Keeping the free list in address order is what lets coalescing detect
  /// true in-memory neighbors by looking only at list neighbors.
  ///
  /// # Safety
  ///
  /// `block` must be a live, unlinked header not already on any list.
  pub unsafe fn insert_by_address(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      if self.head.is_null() || (self.head as usize) > (block as usize) {
        self.push_front(block);
        return;
      }

      let mut current = self.head;
      while !(*current).next.is_null() && ((*current).next as usize) < (block as usize) {
        current = (*current).next;
      }

      (*block).next = (*current).next;
      (*block).prev = current;

      if !(*current).next.is_null() {
        (*(*current).next).prev = block;
      }
      (*current).next = block;
    }
  }

  /// Unlinks `block` and clears its link fields.
  ///
  /// # Safety
  ///
  /// `block` must currently be linked on this list.
  pub unsafe fn remove(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      if self.head == block {
        self.head = (*block).next;
      }

      if !(*block).prev.is_null() {
        (*(*block).prev).next = (*block).next;
      }
      if !(*block).next.is_null() {
        (*(*block).next).prev = (*block).prev;
      }

      (*block).next = ptr::null_mut();
      (*block).prev = ptr::null_mut();
    }
  }

  /// Linear scan for a pointer-equal match.
  ///
  /// This is the allocator's only defense against foreign pointers, so it
  /// deliberately compares addresses without dereferencing `block`.
  ///
  /// # Safety
  ///
  /// The list itself must be well formed; `block` may be any address.
  pub unsafe fn contains(
    &self,
    block: *mut Block,
  ) -> bool {
    unsafe {
      let mut current = self.head;

      while !current.is_null() {
        if current == block {
          return true;
        }
        current = (*current).next;
      }

      false
    }
  }

  /// Number of blocks on the list.
  ///
  /// # Safety
  ///
  /// The list must be well formed.
  pub unsafe fn count(&self) -> usize {
    unsafe {
      let mut count = 0;
      let mut current = self.head;

      while !current.is_null() {
        count += 1;
        current = (*current).next;
      }

      count
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn leak_block(size: usize) -> *mut Block {
    Box::into_raw(Box::new(Block {
      size,
      is_free: true,
      protection: Protection::READ_WRITE,
      next: ptr::null_mut(),
      prev: ptr::null_mut(),
    }))
  }

  unsafe fn reclaim(blocks: &[*mut Block]) {
    for &block in blocks {
      drop(unsafe { Box::from_raw(block) });
    }
  }

  unsafe fn collect(list: &BlockList) -> Vec<*mut Block> {
    let mut out = Vec::new();
    let mut current = list.head();

    while !current.is_null() {
      out.push(current);
      current = unsafe { (*current).next };
    }

    out
  }

  #[test]
  fn push_front_builds_a_lifo_list() {
    let blocks = [leak_block(32), leak_block(64), leak_block(96)];
    let mut list = BlockList::new();

    unsafe {
      for &block in &blocks {
        list.push_front(block);
      }

      assert_eq!(collect(&list), vec![blocks[2], blocks[1], blocks[0]]);
      assert_eq!(list.count(), 3);

      // Back links must mirror the forward links.
      assert!((*blocks[2]).prev.is_null());
      assert_eq!((*blocks[1]).prev, blocks[2]);
      assert_eq!((*blocks[0]).prev, blocks[1]);

      reclaim(&blocks);
    }
  }

  #[test]
  fn insert_by_address_keeps_the_list_sorted() {
    let blocks = [leak_block(32), leak_block(32), leak_block(32), leak_block(32)];
    let mut list = BlockList::new();

    unsafe {
      // Insert in an arbitrary order; the list must come out address-sorted.
      for &block in &[blocks[2], blocks[0], blocks[3], blocks[1]] {
        list.insert_by_address(block);
      }

      let mut expected: Vec<*mut Block> = blocks.to_vec();
      expected.sort_by_key(|&b| b as usize);

      assert_eq!(collect(&list), expected);

      reclaim(&blocks);
    }
  }

  #[test]
  fn remove_handles_head_middle_and_tail() {
    let blocks = [leak_block(32), leak_block(32), leak_block(32)];
    let mut list = BlockList::new();

    unsafe {
      for &block in &[blocks[2], blocks[1], blocks[0]] {
        list.push_front(block);
      }

      // [0, 1, 2] after three push_fronts.
      list.remove(blocks[1]);
      assert_eq!(collect(&list), vec![blocks[0], blocks[2]]);
      assert!((*blocks[1]).next.is_null());
      assert!((*blocks[1]).prev.is_null());

      list.remove(blocks[0]);
      assert_eq!(collect(&list), vec![blocks[2]]);

      list.remove(blocks[2]);
      assert!(list.is_empty());
      assert_eq!(list.count(), 0);

      reclaim(&blocks);
    }
  }

  #[test]
  fn contains_is_pointer_equality() {
    let blocks = [leak_block(32), leak_block(32)];
    let stranger = leak_block(32);
    let mut list = BlockList::new();

    unsafe {
      list.push_front(blocks[0]);
      list.push_front(blocks[1]);

      assert!(list.contains(blocks[0]));
      assert!(list.contains(blocks[1]));
      assert!(!list.contains(stranger));
      assert!(!list.contains(ptr::null_mut()));

      reclaim(&blocks);
      reclaim(&[stranger]);
    }
  }
}
