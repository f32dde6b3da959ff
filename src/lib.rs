//! Boundary-tagged heap allocation from large private reservations.
//!
//! Blocks are served out of arenas: contiguous anonymous mappings
//! partitioned into chunks whose metadata lives in-band. An 8-byte header
//! word carries each chunk's total size plus FREE and PREV-IN-USE flags;
//! free chunks mirror the header in a footer, so coalescing reaches both
//! neighbors in O(1). Placement is first-fit over a doubly-linked LIFO
//! free list with splitting, and a bump frontier grows the explored region
//! on demand and retracts when the topmost chunk is freed.
//!
//! Two engines share that core:
//!
//! - [`global`] — one 1 GiB arena serialized by a single lock.
//! - [`sharded`] — one 64 MiB arena per hardware context, threads bound by
//!   `thread_id % N`, with a per-thread cache of small freed chunks in
//!   front; the cache hit path takes no lock. Re-exported at the crate
//!   root as the default engine.
//!
//! ```
//! let p = tagheap::allocate(64);
//! assert!(!p.is_null());
//! assert_eq!(p as usize % 16, 0);
//! unsafe { tagheap::release(p) };
//! ```

pub mod arena;
pub mod chunk;
pub mod global;
pub mod sharded;

mod sync;
mod tcache;

pub use sharded::{allocate, release};
