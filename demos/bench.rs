//! Alloc/free benchmark: this allocator against the platform allocator.
//!
//! Each iteration performs a burst of random-size allocations followed by
//! a burst of frees, once through `mapalloc` and once through
//! `std::alloc::System`, and reports averaged wall-clock times plus the
//! peak usage and fragmentation the allocator observed.
//!
//! Run with `cargo run --release --example bench`.

use std::alloc::{self, Layout};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mapalloc::{
  allocator_cleanup, allocator_init, allocator_stats, mem_alloc, mem_free, AllocatorConfig,
  Strategy,
};

const NUM_ALLOCATIONS: usize = 10_000;
const MAX_ALLOCATION_SIZE: usize = 1024;
const NUM_ITERATIONS: usize = 5;

/// Small xorshift generator for size jitter; no external dependency and
/// fast enough to stay invisible next to the allocation costs.
struct XorShift64 {
  state: u64,
}

impl XorShift64 {
  fn seeded() -> Self {
    let seed = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(0x9E37_79B9_7F4A_7C15);

    Self {
      state: seed | 1,
    }
  }

  fn next_size(&mut self) -> usize {
    self.state ^= self.state << 13;
    self.state ^= self.state >> 7;
    self.state ^= self.state << 17;
    (self.state as usize % MAX_ALLOCATION_SIZE) + 1
  }
}

struct BenchResult {
  alloc_time: Duration,
  free_time: Duration,
  fragmentation: f64,
  peak_memory: usize,
}

fn run_mapalloc_round(rng: &mut XorShift64) -> BenchResult {
  let mut ptrs = Vec::with_capacity(NUM_ALLOCATIONS);

  let start = Instant::now();
  for _ in 0..NUM_ALLOCATIONS {
    ptrs.push(mem_alloc(rng.next_size()));
  }
  let alloc_time = start.elapsed();

  let stats = allocator_stats();

  let start = Instant::now();
  for ptr in ptrs {
    if !ptr.is_null() {
      unsafe { mem_free(ptr) };
    }
  }
  let free_time = start.elapsed();

  BenchResult {
    alloc_time,
    free_time,
    fragmentation: stats.fragmentation_ratio,
    peak_memory: stats.peak_usage,
  }
}

fn run_system_round(rng: &mut XorShift64) -> BenchResult {
  let mut ptrs = Vec::with_capacity(NUM_ALLOCATIONS);

  let start = Instant::now();
  for _ in 0..NUM_ALLOCATIONS {
    let layout = Layout::from_size_align(rng.next_size(), 8).expect("static layout");
    ptrs.push((unsafe { alloc::alloc(layout) }, layout));
  }
  let alloc_time = start.elapsed();

  let start = Instant::now();
  for (ptr, layout) in ptrs {
    if !ptr.is_null() {
      unsafe { alloc::dealloc(ptr, layout) };
    }
  }
  let free_time = start.elapsed();

  BenchResult {
    alloc_time,
    free_time,
    fragmentation: 0.0,
    peak_memory: 0,
  }
}

fn average(results: &[BenchResult]) -> (Duration, Duration, f64, usize) {
  let n = results.len() as u32;
  let alloc: Duration = results.iter().map(|r| r.alloc_time).sum();
  let free: Duration = results.iter().map(|r| r.free_time).sum();
  let frag: f64 = results.iter().map(|r| r.fragmentation).sum::<f64>() / n as f64;
  let peak: usize = results.iter().map(|r| r.peak_memory).sum::<usize>() / n as usize;

  (alloc / n, free / n, frag, peak)
}

fn main() {
  allocator_init(AllocatorConfig {
    initial_heap_size: 16 * 1024 * 1024,
    strategy: Strategy::BestFit,
    ..AllocatorConfig::default()
  })
  .expect("allocator must initialize");

  println!("Running benchmarks ({NUM_ITERATIONS} iterations of {NUM_ALLOCATIONS} allocations)...\n");

  let mut rng = XorShift64::seeded();
  let mut custom = Vec::with_capacity(NUM_ITERATIONS);
  let mut system = Vec::with_capacity(NUM_ITERATIONS);

  for i in 0..NUM_ITERATIONS {
    println!("Iteration {}/{}...", i + 1, NUM_ITERATIONS);
    custom.push(run_mapalloc_round(&mut rng));
    system.push(run_system_round(&mut rng));
  }

  let (custom_alloc, custom_free, custom_frag, custom_peak) = average(&custom);
  let (system_alloc, system_free, _, _) = average(&system);

  println!("\nBenchmark Results");
  println!("=================\n");

  println!("mapalloc:");
  println!("  Average allocation time: {custom_alloc:?}");
  println!("  Average free time: {custom_free:?}");
  println!("  Average fragmentation: {:.2}%", custom_frag * 100.0);
  println!("  Average peak memory: {custom_peak} bytes\n");

  println!("System allocator:");
  println!("  Average allocation time: {system_alloc:?}");
  println!("  Average free time: {system_free:?}\n");

  println!("Ratio (mapalloc / system):");
  println!(
    "  Allocation time: {:.2}x",
    custom_alloc.as_secs_f64() / system_alloc.as_secs_f64()
  );
  println!(
    "  Free time: {:.2}x",
    custom_free.as_secs_f64() / system_free.as_secs_f64()
  );

  allocator_cleanup();
}
