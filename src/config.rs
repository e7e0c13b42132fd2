//! Allocator configuration: placement strategy, protection flags, and the
//! record captured at [`init`](crate::Heap::init) time.

use std::fmt;

use bitflags::bitflags;

bitflags! {
  /// Per-block memory protection bits.
  ///
  /// Stored in every block header and translated to the OS protection flags
  /// when [`protect`](crate::Heap::protect) is applied at page granularity.
  /// Freshly mapped memory is always readable and writable.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Protection: u32 {
    const READ = 0x1;
    const WRITE = 0x2;
    const EXEC = 0x4;
  }
}

impl Protection {
  /// The default protection of every new block: readable and writable.
  pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
}

impl fmt::Display for Protection {
  /// Renders the flags in the `rwx` style used by the memory-map printer,
  /// e.g. `rw-` for the default protection.
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{}{}{}",
      if self.contains(Self::READ) { 'r' } else { '-' },
      if self.contains(Self::WRITE) { 'w' } else { '-' },
      if self.contains(Self::EXEC) { 'x' } else { '-' },
    )
  }
}

/// Placement policy used when scanning the free list for a block.
///
/// All three strategies are linear scans; they differ only in which of the
/// fitting blocks they hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
  /// The first free block that is large enough.
  #[default]
  FirstFit,
  /// The fitting block with the smallest surplus; first one wins ties.
  BestFit,
  /// The fitting block with the largest surplus; first one wins ties.
  WorstFit,
}

impl Strategy {
  /// Maps the numeric strategy codes accepted in configuration records:
  /// `0` first-fit, `1` best-fit, `2` worst-fit. Unknown codes select
  /// first-fit.
  pub const fn from_code(code: u32) -> Self {
    match code {
      1 => Self::BestFit,
      2 => Self::WorstFit,
      _ => Self::FirstFit,
    }
  }
}

/// Configuration captured once at allocator initialization.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
  /// Lower bound on the first mapping; rounded up to a page multiple.
  pub initial_heap_size: usize,
  /// Page size in bytes; `0` means "query the OS".
  pub page_size: usize,
  /// Advisory only. Accepted for compatibility, not acted upon.
  pub use_guard_pages: bool,
  /// Free-list placement policy.
  pub strategy: Strategy,
}

impl AllocatorConfig {
  /// Default size of the initial mapping: 1 MiB.
  pub const DEFAULT_HEAP_SIZE: usize = 1024 * 1024;

  pub const fn new() -> Self {
    Self {
      initial_heap_size: Self::DEFAULT_HEAP_SIZE,
      page_size: 0,
      use_guard_pages: false,
      strategy: Strategy::FirstFit,
    }
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strategy_codes_map_and_fall_back() {
    assert_eq!(Strategy::from_code(0), Strategy::FirstFit);
    assert_eq!(Strategy::from_code(1), Strategy::BestFit);
    assert_eq!(Strategy::from_code(2), Strategy::WorstFit);
    assert_eq!(Strategy::from_code(3), Strategy::FirstFit);
    assert_eq!(Strategy::from_code(u32::MAX), Strategy::FirstFit);
  }

  #[test]
  fn protection_flags_match_documented_bits() {
    assert_eq!(Protection::READ.bits(), 0x1);
    assert_eq!(Protection::WRITE.bits(), 0x2);
    assert_eq!(Protection::EXEC.bits(), 0x4);
    assert_eq!(Protection::READ_WRITE.bits(), 0x3);
  }

  #[test]
  fn protection_renders_rwx_triplet() {
    assert_eq!(Protection::READ_WRITE.to_string(), "rw-");
    assert_eq!(Protection::READ.to_string(), "r--");
    assert_eq!(Protection::all().to_string(), "rwx");
    assert_eq!(Protection::empty().to_string(), "---");
  }

  #[test]
  fn default_config_is_one_mebibyte_first_fit() {
    let config = AllocatorConfig::default();

    assert_eq!(config.initial_heap_size, 1024 * 1024);
    assert_eq!(config.page_size, 0);
    assert!(!config.use_guard_pages);
    assert_eq!(config.strategy, Strategy::FirstFit);
  }
}
