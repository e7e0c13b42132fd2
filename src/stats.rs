use std::fmt;

/// Aggregate memory counters maintained by the allocator.
///
/// A snapshot is taken under the allocator lock by
/// [`stats`](crate::Heap::stats); the uninitialized allocator reports all
/// zeros. At every operation boundary `used_memory + free_memory` equals
/// `total_memory`, and `peak_usage` never falls below `used_memory`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorStats {
  /// Bytes under management across all mappings, headers included.
  pub total_memory: usize,
  /// Bytes currently held by used blocks, headers included.
  pub used_memory: usize,
  /// Bytes currently held by free blocks, headers included.
  pub free_memory: usize,
  /// Size of one block header — the metadata cost per allocation.
  pub overhead: usize,
  /// Largest `used_memory` observed since initialization.
  pub peak_usage: usize,
  /// Allocations performed since initialization.
  pub total_allocations: usize,
  /// Allocations currently live (blocks on the used list).
  pub active_allocations: usize,
  /// `1 − largest_free_block / free_memory`, or `0` with no free bytes.
  pub fragmentation_ratio: f64,
}

impl AllocatorStats {
  pub const fn new() -> Self {
    Self {
      total_memory: 0,
      used_memory: 0,
      free_memory: 0,
      overhead: 0,
      peak_usage: 0,
      total_allocations: 0,
      active_allocations: 0,
      fragmentation_ratio: 0.0,
    }
  }
}

impl Default for AllocatorStats {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for AllocatorStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Total memory: {} bytes", self.total_memory)?;
    writeln!(f, "Used memory: {} bytes", self.used_memory)?;
    writeln!(f, "Free memory: {} bytes", self.free_memory)?;
    writeln!(f, "Peak usage: {} bytes", self.peak_usage)?;
    writeln!(
      f,
      "Allocations: {} total, {} active",
      self.total_allocations, self.active_allocations
    )?;
    write!(f, "Fragmentation: {:.2}%", self.fragmentation_ratio * 100.0)
  }
}
