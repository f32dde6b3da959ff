//! Per-thread cache of small freed chunks.
//!
//! Bins are spaced 16 bytes apart over the chunk's usable size (total size
//! minus the header word). A cached chunk keeps reading as in-use: its FREE
//! bit stays clear, its neighbors' PREV-IN-USE bits stay set, and only the
//! first payload word is overwritten to thread the bin's stack. The arena
//! therefore never coalesces into a cached chunk.
//!
//! Bins are thread-local; neither path takes a lock. A thread that exits
//! forfeits whatever its bins still hold.

use crate::chunk::{WORD, payload_of, size_of_chunk};
use core::cell::UnsafeCell;
use core::ptr::null_mut;

/// Number of size-class bins per thread.
pub const TCACHE_BINS: usize = 64;

/// Chunks a bin may hold before frees fall through to the arena.
pub const TCACHE_MAX_PER_BIN: u32 = 32;

/// One LIFO stack of chunk headers, threaded through first payload words.
struct Bin {
  head: *mut u8,
  count: u32,
}

struct ThreadCache {
  bins: [Bin; TCACHE_BINS],
}

impl ThreadCache {
  const fn new() -> Self {
    Self {
      bins: [const { Bin { head: null_mut(), count: 0 } }; TCACHE_BINS],
    }
  }
}

thread_local! {
  static TCACHE: UnsafeCell<ThreadCache> = const { UnsafeCell::new(ThreadCache::new()) };
}

/// Bin for a chunk whose payload spans `usable` bytes. `None` when the
/// chunk is too small or too large to cache.
#[inline]
fn bin_index(usable: usize) -> Option<usize> {
  let idx = usable / 16;
  if idx == 0 || idx > TCACHE_BINS {
    None
  } else {
    Some(idx - 1)
  }
}

/// Pop a cached chunk able to serve a request of `need` total bytes.
/// Returns the payload pointer; `None` on a bin miss or when the request
/// falls outside the cached range.
#[inline]
pub fn pop(need: usize) -> Option<*mut u8> {
  let bin = bin_index(need - WORD)?;

  TCACHE
    .try_with(|tc| {
      // Single-threaded access: the cell is thread-local and nothing in
      // here calls back into the cache.
      let tc = unsafe { &mut *tc.get() };
      let b = &mut tc.bins[bin];
      if b.head.is_null() {
        return None;
      }

      let hdr = b.head;
      unsafe {
        b.head = payload_of(hdr).cast::<*mut u8>().read();
        b.count -= 1;
        Some(payload_of(hdr))
      }
    })
    .ok()
    .flatten()
}

/// Push the chunk at `hdr` onto its bin. Returns false when the chunk does
/// not fit a bin, the bin is full, or thread-local storage is already torn
/// down; the caller then takes the arena path.
///
/// # Safety
///
/// `hdr` must be the header of a live chunk owned by the caller; its first
/// payload word is overwritten.
#[inline]
pub unsafe fn push(hdr: *mut u8) -> bool {
  let usable = unsafe { size_of_chunk(hdr) } - WORD;
  let Some(bin) = bin_index(usable) else {
    return false;
  };

  TCACHE
    .try_with(|tc| {
      let tc = unsafe { &mut *tc.get() };
      let b = &mut tc.bins[bin];
      if b.count >= TCACHE_MAX_PER_BIN {
        return false;
      }

      unsafe { payload_of(hdr).cast::<*mut u8>().write(b.head) };
      b.head = hdr;
      b.count += 1;
      true
    })
    .unwrap_or(false)
}
