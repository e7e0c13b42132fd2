//! # mapalloc - A Free-List Memory Allocator Library
//!
//! This crate provides a general-purpose **free-list allocator** that
//! serves variable-size requests out of anonymous page mappings obtained
//! with `mmap`, with selectable placement policies and runtime
//! observability of the memory state.
//!
//! ## Overview
//!
//! ```text
//!   Free-List Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                      MAPPED HEAP MEMORY                          │
//!   │                                                                  │
//!   │   ┌────────┬────────┬────────┬────────┬───────────────────────┐  │
//!   │   │ hdr│A  │ hdr│   │ hdr│B  │ hdr│   │ hdr│   free tail      │  │
//!   │   │  used  │  FREE  │  used  │  FREE  │       FREE            │  │
//!   │   └────────┴────────┴────────┴────────┴───────────────────────┘  │
//!   │              ▲                 ▲                ▲                │
//!   │              └────── free list (address order) ─┘                │
//!   │                                                                  │
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   Each block is prefixed by an in-place header. Freed blocks return
//!   to the free list and fuse with touching neighbors; allocation scans
//!   the free list first-fit, best-fit, or worst-fit and splits what it
//!   finds. When nothing fits, a fresh mapping extends the pool.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   mapalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header & intrusive list primitives (internal)
//!   ├── config     - AllocatorConfig, Strategy, Protection flags
//!   ├── error      - AllocatorError for the fallible entry points
//!   ├── global     - Process-wide singleton: mem_* / allocator_* API
//!   ├── heap       - The heap manager core
//!   ├── os         - OS page provider: map / unmap / protect (internal)
//!   └── stats      - AllocatorStats record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mapalloc::{allocator_cleanup, allocator_init, allocator_stats};
//! use mapalloc::{mem_alloc, mem_free, AllocatorConfig, Strategy};
//!
//! fn main() {
//!     allocator_init(AllocatorConfig {
//!         initial_heap_size: 1024 * 1024,
//!         strategy: Strategy::BestFit,
//!         ..AllocatorConfig::default()
//!     })
//!     .expect("allocator must initialize");
//!
//!     let ptr = mem_alloc(100);
//!     assert!(!ptr.is_null());
//!
//!     unsafe {
//!         ptr.write_bytes(0x42, 100);
//!         mem_free(ptr);
//!     }
//!
//!     println!("{}", allocator_stats());
//!     allocator_cleanup();
//! }
//! ```
//!
//! For code that prefers an explicit receiver over process-wide state, the
//! same operations exist on the [`Heap`] value type; the global functions
//! are a mutex-guarded wrapper around one `Heap` in a `static`.
//!
//! ## Features
//!
//! - **Selectable placement**: first-fit, best-fit, or worst-fit scans
//! - **Split & coalesce**: surplus tails are carved off, freed neighbors
//!   fuse, keeping fragmentation low across arbitrary workloads
//! - **Heap extension**: exhaustion maps fresh pages instead of failing
//! - **In-place realloc**: shrink and grow without copying where possible
//! - **Aligned allocation**: any power-of-two alignment
//! - **Per-region protection**: read/write/exec changes at page granularity
//! - **Observability**: counter snapshots and an address-ordered memory map
//!
//! ## Limitations
//!
//! - **One global mutex**: every operation serializes; there are no
//!   per-thread caches and no lock-free paths
//! - **Linear scans**: placement and pointer validation cost O(list length)
//! - **Unix-only**: requires `libc` with `mmap`/`mprotect` (POSIX systems)
//!
//! ## Safety
//!
//! The allocator hands out raw pointers and stores its metadata inside the
//! managed memory itself. The unsafe surface is confined to the block and
//! OS layers; public entry points that accept pointers are `unsafe fn`s
//! whose contracts match the platform `free`/`mprotect` rules.

pub mod align;
mod block;
mod config;
mod error;
mod global;
mod heap;
mod os;
mod stats;

pub use config::{AllocatorConfig, Protection, Strategy};
pub use error::AllocatorError;
pub use global::{
  allocator_cleanup, allocator_init, allocator_memory_map, allocator_print_memory_map,
  allocator_stats, mem_alloc, mem_alloc_aligned, mem_free, mem_free_aligned, mem_protect,
  mem_realloc,
};
pub use heap::{Heap, MemoryRegion};
pub use stats::AllocatorStats;
