//! Narrated tour of the allocator: initialization, a few allocations, a
//! hole, in-place reallocation, aligned allocation, and cleanup, with the
//! memory map printed at each interesting point.
//!
//! Run with `cargo run --example walkthrough [strategy-code]`, where the
//! optional code selects the placement policy: `0` first-fit, `1`
//! best-fit (the default here), `2` worst-fit. Unknown codes fall back
//! to first-fit.

use mapalloc::{
  allocator_cleanup, allocator_init, allocator_print_memory_map, allocator_stats, mem_alloc,
  mem_alloc_aligned, mem_free, mem_free_aligned, mem_realloc, AllocatorConfig, Strategy,
};

fn main() {
  // --------------------------------------------------------------------
  // 1) Initialize a 1 MiB pool. The placement policy arrives as a
  //    numeric code, as it would from any external configuration source.
  // --------------------------------------------------------------------
  let code = std::env::args()
    .nth(1)
    .and_then(|arg| arg.parse::<u32>().ok())
    .unwrap_or(1);
  let strategy = Strategy::from_code(code);

  allocator_init(AllocatorConfig {
    initial_heap_size: 1024 * 1024,
    strategy,
    ..AllocatorConfig::default()
  })
  .expect("allocator must initialize");

  println!("[1] Initialized with {strategy:?}: one free block spans the whole pool\n");
  allocator_print_memory_map();

  // --------------------------------------------------------------------
  // 2) Three allocations carve the pool from the front.
  // --------------------------------------------------------------------
  let first = mem_alloc(100);
  let second = mem_alloc(200);
  let third = mem_alloc(300);
  assert!(!first.is_null() && !second.is_null() && !third.is_null());

  unsafe {
    first.write_bytes(0x11, 100);
    second.write_bytes(0x22, 200);
    third.write_bytes(0x33, 300);
  }

  println!("\n[2] After alloc(100), alloc(200), alloc(300)\n");
  allocator_print_memory_map();

  // --------------------------------------------------------------------
  // 3) Freeing the middle allocation leaves a hole between two used
  //    blocks; the fragmentation ratio becomes nonzero.
  // --------------------------------------------------------------------
  unsafe { mem_free(second) };

  println!("\n[3] After freeing the middle block (note the hole)\n");
  allocator_print_memory_map();

  // --------------------------------------------------------------------
  // 4) Growing the last allocation happens in place: the free tail
  //    right behind it is absorbed, so the pointer does not move.
  // --------------------------------------------------------------------
  let grown = unsafe { mem_realloc(third, 600) };
  println!(
    "\n[4] realloc(third, 600): {}",
    if grown == third {
      "grew in place, pointer unchanged"
    } else {
      "relocated"
    }
  );
  unsafe {
    // The original 300 bytes survived the resize.
    assert_eq!(grown.read(), 0x33);
    assert_eq!(grown.add(299).read(), 0x33);
  }

  // --------------------------------------------------------------------
  // 5) Aligned allocation: the returned address is a multiple of 64.
  // --------------------------------------------------------------------
  let aligned = mem_alloc_aligned(100, 64);
  assert!(!aligned.is_null());
  println!(
    "\n[5] mem_alloc_aligned(100, 64) = {:p} (mod 64 = {})",
    aligned,
    aligned as usize % 64
  );

  // --------------------------------------------------------------------
  // 6) Release everything and show the final counters.
  // --------------------------------------------------------------------
  unsafe {
    mem_free(first);
    mem_free(grown);
    mem_free_aligned(aligned);
  }

  println!("\n[6] After freeing everything\n");
  println!("{}", allocator_stats());

  allocator_cleanup();
  println!("\n[7] Cleaned up; all mappings returned to the OS.");
}
