//! Engine with one process-wide arena behind a single lock.
//!
//! Every call acquires the lock around its whole critical section; there is
//! no per-thread state. The arena is built lazily on first use and lives
//! for the process.

use crate::arena::Arena;
use crate::sync::SpinMutex;
use core::ptr::null_mut;
use std::sync::OnceLock;

/// Reservation size of the single arena.
pub const REGION_SIZE: usize = 1 << 30; // 1 GiB

static ARENA: OnceLock<Option<SpinMutex<Arena>>> = OnceLock::new();

/// The process arena, or `None` when the reservation could not be mapped;
/// that failure is permanent and every later call observes it.
fn arena() -> Option<&'static SpinMutex<Arena>> {
  ARENA
    .get_or_init(|| Arena::new(REGION_SIZE).map(SpinMutex::new))
    .as_ref()
}

/// Allocate `size` bytes. Returns a 16-byte-aligned pointer to at least
/// `align16(size)` uninitialized bytes, or null when `size` is zero, the
/// reservation failed, or the arena is exhausted.
pub fn allocate(size: usize) -> *mut u8 {
  if size == 0 {
    return null_mut();
  }

  match arena() {
    Some(a) => a.lock().allocate(size),
    None => null_mut(),
  }
}

/// Release a block. Null is a no-op.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by this engine's [`allocate`]
/// and not yet released.
pub unsafe fn release(ptr: *mut u8) {
  if ptr.is_null() {
    return;
  }

  if let Some(a) = arena() {
    unsafe { a.lock().release(ptr) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_size_returns_null() {
    assert!(allocate(0).is_null());
  }

  #[test]
  fn null_release_is_a_noop() {
    for _ in 0..3 {
      unsafe { release(null_mut()) };
    }
    let p = allocate(64);
    assert!(!p.is_null());
    unsafe { release(p) };
  }

  #[test]
  fn pattern_survives_round_trip() {
    let sizes = [16usize, 32, 64, 128, 256, 512, 1024];
    let mut live = Vec::new();

    for (i, &n) in sizes.iter().cycle().take(512).enumerate() {
      let p = allocate(n);
      assert!(!p.is_null());
      assert_eq!(p as usize % 16, 0);
      unsafe { core::ptr::write_bytes(p, (i & 0xFF) as u8, n) };
      live.push((p, n, (i & 0xFF) as u8));
    }

    for (p, n, pattern) in live {
      for off in 0..n {
        assert_eq!(unsafe { p.add(off).read() }, pattern);
      }
      unsafe { release(p) };
    }
  }

  #[test]
  fn contended_threads_share_one_arena() {
    let threads = 4;
    let iters = 10_000usize;

    let handles: Vec<_> = (0..threads)
      .map(|tid: usize| {
        std::thread::spawn(move || {
          for i in 0..iters {
            let n = 16 + (i + tid) % 256;
            let p = allocate(n);
            assert!(!p.is_null(), "thread {tid}: allocation {i} failed");

            let pattern = (tid + 1) as u8;
            unsafe { core::ptr::write_bytes(p, pattern, n) };
            for off in [0, n / 2, n - 1] {
              assert_eq!(
                unsafe { p.add(off).read() },
                pattern,
                "thread {tid}: corrupted at {off}"
              );
            }

            unsafe { release(p) };
          }
        })
      })
      .collect();

    for h in handles {
      h.join().unwrap();
    }
  }
}
