//! End-to-end scenarios over the process-wide allocator API.
//!
//! Every test here drives the same global singleton, so they serialize
//! through a test-local mutex and each one starts from a clean slate and
//! cleans up after itself.

use std::sync::{Mutex, PoisonError};

use mapalloc::{
  allocator_cleanup, allocator_init, allocator_memory_map, allocator_stats, mem_alloc,
  mem_alloc_aligned, mem_free, mem_free_aligned, mem_protect, mem_realloc, AllocatorConfig,
  Protection, Strategy,
};

static EXCLUSIVE: Mutex<()> = Mutex::new(());

/// Runs `body` with exclusive, freshly-reset ownership of the global
/// allocator. A panicking test poisons the mutex; the next test recovers
/// and resets the allocator before running.
fn with_exclusive_allocator(body: impl FnOnce()) {
  let _guard = EXCLUSIVE.lock().unwrap_or_else(PoisonError::into_inner);

  allocator_cleanup();
  body();
  allocator_cleanup();
}

fn init_mib(strategy: Strategy) {
  allocator_init(AllocatorConfig {
    initial_heap_size: 1024 * 1024,
    strategy,
    ..AllocatorConfig::default()
  })
  .expect("init should succeed");
}

#[test]
fn smoke() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let stats = allocator_stats();
    assert_eq!(stats.free_memory, 1024 * 1024);
    assert_eq!(stats.used_memory, 0);

    let ptr = mem_alloc(100);
    assert!(!ptr.is_null());
    assert!(allocator_stats().used_memory > 0);

    unsafe { mem_free(ptr) };
    assert_eq!(allocator_stats().used_memory, 0);
  });
}

#[test]
fn five_allocations_freed_in_reverse() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let mut ptrs = Vec::new();
    for i in 0..5u8 {
      let ptr = mem_alloc(100);
      assert!(!ptr.is_null());

      unsafe { ptr.write_bytes(i, 100) };
      ptrs.push(ptr);
    }

    for (i, &ptr) in ptrs.iter().enumerate() {
      for offset in 0..100 {
        assert_eq!(unsafe { ptr.add(offset).read() }, i as u8);
      }
    }

    for &ptr in ptrs.iter().rev() {
      unsafe { mem_free(ptr) };
    }

    assert_eq!(allocator_stats().used_memory, 0);
    assert_eq!(allocator_stats().active_allocations, 0);
  });
}

#[test]
fn aligned_allocation() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let ptr = mem_alloc_aligned(100, 64);
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % 64, 0);

    unsafe {
      ptr.write_bytes(0x7E, 100);
      assert_eq!(ptr.add(99).read(), 0x7E);
      mem_free_aligned(ptr);
    }

    assert_eq!(allocator_stats().used_memory, 0);

    // Alignment must be a nonzero power of two.
    assert!(mem_alloc_aligned(100, 0).is_null());
    assert!(mem_alloc_aligned(100, 100).is_null());
  });
}

#[test]
fn realloc_preserves_data_on_grow() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let ptr = mem_alloc(100);
    assert!(!ptr.is_null());

    unsafe {
      ptr.write_bytes(0x55, 100);

      let grown = mem_realloc(ptr, 200);
      assert!(!grown.is_null());

      for offset in 0..100 {
        assert_eq!(grown.add(offset).read(), 0x55);
      }

      mem_free(grown);
    }

    assert_eq!(allocator_stats().used_memory, 0);
  });
}

#[test]
fn fragmentation_after_checkerboard_frees() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let mut ptrs = Vec::new();
    for i in 0..100usize {
      let ptr = mem_alloc((i % 10 + 1) * 32);
      assert!(!ptr.is_null());
      ptrs.push(ptr);
    }

    for &ptr in ptrs.iter().step_by(2) {
      unsafe { mem_free(ptr) };
    }

    let ratio = allocator_stats().fragmentation_ratio;
    assert!((0.0..=1.0).contains(&ratio));
    assert!(ratio > 0.0, "holes between live blocks must fragment the pool");

    for &ptr in ptrs.iter().skip(1).step_by(2) {
      unsafe { mem_free(ptr) };
    }

    assert_eq!(allocator_stats().used_memory, 0);
    assert_eq!(allocator_stats().fragmentation_ratio, 0.0);
  });
}

#[test]
fn protection_change_keeps_the_block_observable() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::BestFit);

    let ptr = mem_alloc(100);
    assert!(!ptr.is_null());

    unsafe {
      mem_protect(ptr, 100, Protection::READ).expect("read-only protect should succeed");
    }

    // Snapshot paths only read; the block must still be reported, now
    // with its recorded protection.
    let stats = allocator_stats();
    assert_eq!(stats.active_allocations, 1);

    let region = allocator_memory_map()
      .into_iter()
      .find(|r| !r.is_free)
      .expect("the allocation must appear in the map");
    assert_eq!(region.protection, Protection::READ);

    // No free: the page under the header is read-only now. Cleanup
    // unmaps it regardless of protection.
  });
}

#[test]
fn boundary_behaviors() {
  with_exclusive_allocator(|| {
    // Everything fails closed before initialization.
    assert!(mem_alloc(100).is_null());
    assert_eq!(allocator_stats().total_memory, 0);

    init_mib(Strategy::FirstFit);

    assert!(mem_alloc(0).is_null());

    unsafe {
      mem_free(std::ptr::null_mut());

      // realloc(null, n) behaves as alloc(n).
      let ptr = mem_realloc(std::ptr::null_mut(), 100);
      assert!(!ptr.is_null());

      // realloc(p, 0) behaves as free(p) and returns null.
      assert!(mem_realloc(ptr, 0).is_null());
    }
    assert_eq!(allocator_stats().used_memory, 0);

    // Double init fails; cleanup twice is a no-op.
    assert!(allocator_init(AllocatorConfig::default()).is_err());
    allocator_cleanup();
    allocator_cleanup();
    assert_eq!(allocator_stats().total_memory, 0);

    // The allocator is usable again after cleanup.
    init_mib(Strategy::FirstFit);
    let ptr = mem_alloc(100);
    assert!(!ptr.is_null());
    unsafe { mem_free(ptr) };
  });
}

#[test]
fn threads_serialize_through_the_global_lock() {
  with_exclusive_allocator(|| {
    init_mib(Strategy::FirstFit);

    let handles: Vec<_> = (0..4u8)
      .map(|id| {
        std::thread::spawn(move || {
          for round in 0..100usize {
            let size = (round % 13 + 1) * 16;
            let ptr = mem_alloc(size);
            assert!(!ptr.is_null());

            unsafe {
              ptr.write_bytes(id, size);
              assert_eq!(ptr.read(), id);
              assert_eq!(ptr.add(size - 1).read(), id);
              mem_free(ptr);
            }
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().expect("worker thread should not panic");
    }

    let stats = allocator_stats();
    assert_eq!(stats.used_memory, 0);
    assert_eq!(stats.active_allocations, 0);
    assert_eq!(stats.total_allocations, 400);
  });
}
