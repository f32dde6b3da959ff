//! Engine with per-hardware-context arenas and a per-thread cache in front.
//!
//! A process-wide registry of up to [`MAX_ARENAS`] arenas is built on first
//! use, one per hardware context. Each thread binds to arena
//! `thread_id % N` and keeps that binding for its lifetime. Allocation asks
//! the thread cache first (no lock), then the bound arena under its lock;
//! release mirrors that. A block freed on a thread bound to a different
//! arena than the one it came from is processed entirely by the freeing
//! thread's arena: it enters that thread's cache or that arena's free
//! list, uncoalesced, and never migrates back.

use crate::arena::Arena;
use crate::chunk::{chunk_of, request_size};
use crate::sync::SpinMutex;
use crate::tcache;
use core::cell::Cell;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

pub use crate::tcache::{TCACHE_BINS, TCACHE_MAX_PER_BIN};

/// Reservation size per arena.
pub const REGION_SIZE: usize = 64 << 20; // 64 MiB

/// Upper bound on the number of arenas.
pub const MAX_ARENAS: usize = 64;

struct Registry {
  arenas: Vec<SpinMutex<Arena>>,
}

static REGISTRY: OnceLock<Option<Registry>> = OnceLock::new();

/// The arena table: one arena per hardware context, capped at
/// [`MAX_ARENAS`], at least one. `None` when not a single reservation
/// could be mapped; that failure is permanent.
fn registry() -> Option<&'static Registry> {
  REGISTRY
    .get_or_init(|| {
      let wanted = std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .min(MAX_ARENAS);

      let mut arenas = Vec::with_capacity(wanted);
      for _ in 0..wanted {
        match Arena::new(REGION_SIZE) {
          Some(a) => arenas.push(SpinMutex::new(a)),
          None => break,
        }
      }

      if arenas.is_empty() {
        None
      } else {
        Some(Registry { arenas })
      }
    })
    .as_ref()
}

// Each thread gets a distinct id; ids only need uniqueness, not density.
fn thread_id() -> u32 {
  static CTR: AtomicU32 = AtomicU32::new(0);
  thread_local! {
    static TID: Cell<Option<u32>> = const { Cell::new(None) };
  }

  TID
    .try_with(|slot| match slot.get() {
      Some(id) => id,
      None => {
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        slot.set(Some(id));
        id
      }
    })
    // TLS already torn down: a fresh id still maps to some arena.
    .unwrap_or_else(|_| CTR.fetch_add(1, Ordering::Relaxed))
}

thread_local! {
  static BOUND: Cell<Option<&'static SpinMutex<Arena>>> = const { Cell::new(None) };
}

/// The arena this thread dispatches to: `thread_id % N`, cached for the
/// thread's lifetime.
fn bound_arena() -> Option<&'static SpinMutex<Arena>> {
  let reg = registry()?;

  if let Ok(Some(a)) = BOUND.try_with(|slot| slot.get()) {
    return Some(a);
  }

  let idx = thread_id() as usize % reg.arenas.len();
  let a = &reg.arenas[idx];
  let _ = BOUND.try_with(|slot| slot.set(Some(a)));
  Some(a)
}

/// Allocate `size` bytes: thread cache first (no lock), then the bound
/// arena. Returns a 16-byte-aligned pointer to at least `align16(size)`
/// uninitialized bytes, or null when `size` is zero, its rounded total
/// overflows `usize`, no reservation could be mapped, or the bound arena
/// is exhausted.
pub fn allocate(size: usize) -> *mut u8 {
  if size == 0 {
    return null_mut();
  }

  // A request too large to round is unservable; treat it as exhaustion.
  let Some(need) = request_size(size) else {
    return null_mut();
  };
  if let Some(p) = tcache::pop(need) {
    return p;
  }

  match bound_arena() {
    Some(a) => a.lock().allocate(size),
    None => null_mut(),
  }
}

/// Release a block: thread cache first (no lock), then the bound arena.
/// Null is a no-op.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by this engine's [`allocate`]
/// (on any thread) and not yet released.
pub unsafe fn release(ptr: *mut u8) {
  if ptr.is_null() {
    return;
  }

  let hdr = unsafe { chunk_of(ptr) };
  if unsafe { tcache::push(hdr) } {
    return;
  }

  if let Some(a) = bound_arena() {
    unsafe { a.lock().release(ptr) };
  }
}
