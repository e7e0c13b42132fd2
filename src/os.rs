//! The OS page provider.
//!
//! The allocator depends on exactly three operations and one constant from
//! the operating system: mapping anonymous pages, unmapping them, changing
//! their protection, and the page size. Everything here is a thin wrapper
//! over the corresponding `libc` call; no allocator state is touched.

use std::{io, ptr};

use libc::c_void;

use crate::config::Protection;

/// Queries the system page size via `sysconf(_SC_PAGESIZE)`.
///
/// Falls back to 4096 if the query fails, which no supported platform does
/// in practice.
pub(crate) fn page_size() -> usize {
  // Safety: sysconf has no memory-safety preconditions.
  let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

  if value <= 0 { 4096 } else { value as usize }
}

/// Maps `len` bytes of zero-filled, read-write anonymous memory.
///
/// The returned region is page-aligned and private to this process. `len`
/// is passed through untouched; callers round it to a page multiple first.
pub(crate) fn map_pages(len: usize) -> Result<*mut u8, io::Error> {
  // Safety: an anonymous private mapping with a null hint involves no
  // existing memory; the kernel picks the placement.
  let addr = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if addr == libc::MAP_FAILED {
    Err(io::Error::last_os_error())
  } else {
    Ok(addr as *mut u8)
  }
}

/// Returns a mapping obtained from [`map_pages`] to the OS.
///
/// An `munmap` failure at this point is not actionable by the caller, so it
/// is logged and swallowed.
///
/// # Safety
///
/// `addr` and `len` must describe exactly one region previously returned by
/// [`map_pages`], and no pointer into the region may be used afterwards.
pub(crate) unsafe fn unmap_pages(
  addr: *mut u8,
  len: usize,
) {
  let result = unsafe { libc::munmap(addr as *mut c_void, len) };

  if result != 0 {
    log::warn!(
      "munmap({:p}, {}) failed: {}",
      addr,
      len,
      io::Error::last_os_error()
    );
  }
}

/// Applies `protection` to the pages covering `[addr, addr + len)`.
///
/// Empty flags translate to `PROT_NONE`, making the range inaccessible.
///
/// # Safety
///
/// `addr` must be page-aligned and the whole range must lie within mappings
/// owned by the caller. Revoking access from memory that is subsequently
/// read or written crashes the process; that is the caller's contract with
/// its own users.
pub(crate) unsafe fn set_page_protection(
  addr: *mut u8,
  len: usize,
  protection: Protection,
) -> Result<(), io::Error> {
  let mut prot = libc::PROT_NONE;

  if protection.contains(Protection::READ) {
    prot |= libc::PROT_READ;
  }
  if protection.contains(Protection::WRITE) {
    prot |= libc::PROT_WRITE;
  }
  if protection.contains(Protection::EXEC) {
    prot |= libc::PROT_EXEC;
  }

  let result = unsafe { libc::mprotect(addr as *mut c_void, len, prot) };

  if result != 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_size_is_a_nonzero_power_of_two() {
    let size = page_size();

    assert!(size > 0);
    assert!(size.is_power_of_two());
  }

  #[test]
  fn mapped_pages_are_zeroed_and_writable() {
    let len = page_size();
    let addr = map_pages(len).expect("anonymous mapping should succeed");

    unsafe {
      let bytes = std::slice::from_raw_parts_mut(addr, len);
      assert!(bytes.iter().all(|&b| b == 0));

      bytes[0] = 0xAB;
      bytes[len - 1] = 0xCD;
      assert_eq!(bytes[0], 0xAB);
      assert_eq!(bytes[len - 1], 0xCD);

      unmap_pages(addr, len);
    }
  }

  #[test]
  fn protection_change_round_trips() {
    let len = page_size();
    let addr = map_pages(len).expect("anonymous mapping should succeed");

    unsafe {
      set_page_protection(addr, len, Protection::READ).expect("read-only should succeed");

      // Still readable.
      assert_eq!(addr.read(), 0);

      set_page_protection(addr, len, Protection::READ_WRITE)
        .expect("restoring read-write should succeed");
      addr.write(7);
      assert_eq!(addr.read(), 7);

      unmap_pages(addr, len);
    }
  }

  #[test]
  fn zero_length_mapping_is_rejected() {
    assert!(map_pages(0).is_err());
  }
}
