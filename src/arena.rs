//! Arena: one contiguous anonymous reservation partitioned into
//! boundary-tagged chunks.
//!
//! The reservation is split by the bump frontier into an explored region
//! `[base, bump)`, fully partitioned into chunks, and an unexplored region
//! `[bump, end)` of raw mapped memory. Allocation first-fits the free list,
//! then carves fresh chunks off the frontier; release coalesces with free
//! neighbors and retracts the frontier when the merged chunk ends at it.
//!
//! The chunk immediately below the frontier is always in-use: release never
//! links a frontier-adjacent chunk, it retracts over it instead. Carving
//! relies on this to set the new chunk's PREV-IN-USE bit without looking
//! left.

use crate::chunk::{
  FreeChunk, MIN_FREE_CHUNK, WORD, align16, chunk_of, is_free, next_chunk, payload_of,
  prev_if_free, prev_in_use, request_size, set_prev_in_use, size_of_chunk, write_footer,
  write_header_preserving_prev,
};
use core::ptr::null_mut;

// =============================================================================
// Platform
// =============================================================================

unsafe fn os_map(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

unsafe fn os_unmap(ptr: *mut u8, size: usize) {
  unsafe { libc::munmap(ptr.cast(), size) };
}

fn page_size() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

// =============================================================================
// Arena
// =============================================================================

pub struct Arena {
  /// First byte of the reservation.
  base: *mut u8,
  /// First unexplored byte; grows forward on carve, retracts on release of
  /// the topmost chunk.
  bump: *mut u8,
  /// One past the last byte of the reservation.
  end: *mut u8,
  /// Head of the doubly-linked LIFO free list, threaded through free
  /// chunks' payloads.
  free_list: *mut FreeChunk,
  /// Mapped length, for unmapping on drop.
  region: usize,
}

unsafe impl Send for Arena {}

impl Arena {
  /// Map a fresh private anonymous reservation of `region_size` bytes,
  /// rounded up to the page size. `None` when the mapping fails; the
  /// reservation is never grown or shrunk afterwards.
  pub fn new(region_size: usize) -> Option<Arena> {
    let ps = page_size();
    let mut len = region_size;
    if len % ps != 0 {
      len += ps - len % ps;
    }

    let base = unsafe { os_map(len) };
    if base.is_null() {
      return None;
    }

    Some(Arena {
      base,
      bump: base,
      end: unsafe { base.add(len) },
      free_list: null_mut(),
      region: len,
    })
  }

  /// Whether `ptr` lies inside this arena's reservation. Scopes every
  /// neighbor-touching step: a chunk from a foreign reservation has no
  /// neighbors here.
  #[inline]
  pub fn contains(&self, ptr: *mut u8) -> bool {
    let addr = ptr as usize;
    addr >= self.base as usize && addr < self.end as usize
  }

  /// Serve an `n`-byte request (`n >= 1`). Returns a 16-byte-aligned
  /// payload pointer to `align16(n)` usable bytes, or null when neither the
  /// free list nor the frontier can fit it. A request whose rounded total
  /// does not fit in `usize` is unservable by definition and nulls too.
  pub fn allocate(&mut self, n: usize) -> *mut u8 {
    debug_assert!(n >= 1);
    let Some(need) = request_size(n) else {
      return null_mut();
    };

    let hdr = unsafe {
      match self.take_first_fit(need) {
        Some(hdr) => hdr,
        None => match self.carve_from_top(need) {
          Some(hdr) => hdr,
          None => return null_mut(),
        },
      }
    };

    debug_assert!(unsafe { payload_of(hdr) } as usize % 16 == 0);
    unsafe { payload_of(hdr) }
  }

  /// Return the chunk behind `payload` to the arena: mark free, coalesce
  /// with free neighbors, then either retract the frontier over it or push
  /// it onto the free list.
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by [`Arena::allocate`] (on this or,
  /// under an engine that dispatches frees by thread, another arena) and
  /// not yet released.
  pub unsafe fn release(&mut self, payload: *mut u8) {
    let hdr = unsafe { chunk_of(payload) };
    let csz = unsafe { size_of_chunk(hdr) };

    unsafe {
      write_header_preserving_prev(hdr, csz, true);
      write_footer(hdr, csz);
    }

    // A chunk from a foreign reservation joins the list as-is: its
    // neighbors live in an arena this one does not own.
    if !self.contains(hdr) {
      unsafe { self.push_front(hdr as *mut FreeChunk) };
      return;
    }

    let merged = unsafe { self.coalesce(hdr) };
    let merged_size = unsafe { size_of_chunk(merged) };
    let merged_end = unsafe { merged.add(merged_size) };

    unsafe { self.set_next_prev_in_use(merged, false) };

    // Ends at the frontier: retract instead of linking, so no free chunk
    // ever touches the unexplored region.
    if merged_end == self.bump {
      self.bump = merged;
      return;
    }

    unsafe { self.push_front(merged as *mut FreeChunk) };
  }

  // ===========================================================================
  // Placement
  // ===========================================================================

  /// First fit: walk the free list head-first and take the first chunk
  /// large enough for `need` total bytes.
  unsafe fn take_first_fit(&mut self, need: usize) -> Option<*mut u8> {
    let mut fc = self.free_list;
    while !fc.is_null() {
      if unsafe { size_of_chunk(fc as *mut u8) } >= need {
        return Some(unsafe { self.take_chunk(fc, need) });
      }
      fc = unsafe { (*fc).links.next };
    }
    None
  }

  /// Unlink `fc` and hand it out, splitting off the tail when the remainder
  /// can still stand as a free chunk of its own. The remainder goes to the
  /// front of the free list.
  unsafe fn take_chunk(&mut self, fc: *mut FreeChunk, need: usize) -> *mut u8 {
    let hdr = fc as *mut u8;
    let csz = unsafe { size_of_chunk(hdr) };

    unsafe { self.unlink(fc) };

    if csz >= need + MIN_FREE_CHUNK {
      unsafe {
        write_header_preserving_prev(hdr, need, false);
        self.set_next_prev_in_use(hdr, true);

        let rem = hdr.add(need);
        let rem_size = csz - need;
        write_header_preserving_prev(rem, rem_size, true);
        write_footer(rem, rem_size);
        self.push_front(rem as *mut FreeChunk);
      }
    } else {
      // Remainder too small to stand alone; the caller gets the whole
      // chunk and up to MIN_FREE_CHUNK - 16 slack bytes.
      unsafe {
        write_header_preserving_prev(hdr, csz, false);
        self.set_next_prev_in_use(hdr, true);
      }
    }

    hdr
  }

  /// Carve a fresh chunk off the unexplored region. The header lands at
  /// `align16(bump + WORD) - WORD` so the payload is 16-byte-aligned; the
  /// first carve of a reservation leaves one dead word at the base.
  unsafe fn carve_from_top(&mut self, need: usize) -> Option<*mut u8> {
    let payload_addr = (self.bump as usize).checked_add(WORD).and_then(align16)?;
    let hdr_addr = payload_addr - WORD;
    if (self.end as usize).saturating_sub(hdr_addr) < need {
      return None;
    }

    let hdr = hdr_addr as *mut u8;
    unsafe {
      write_header_preserving_prev(hdr, need, false);
      // The chunk below the frontier is never free, so the carved chunk's
      // left neighbor is in-use without inspection.
      set_prev_in_use(hdr, true);
      self.bump = hdr.add(need);
    }

    Some(hdr)
  }

  /// Merge `hdr` with its free neighbors. Returns the header of the merged
  /// chunk, which moves down when the left neighbor is absorbed.
  unsafe fn coalesce(&mut self, hdr: *mut u8) -> *mut u8 {
    let mut hdr = hdr;
    let mut csz = unsafe { size_of_chunk(hdr) };

    let next = unsafe { next_chunk(hdr) };
    if next < self.bump && unsafe { is_free(next) } {
      unsafe {
        let next_size = size_of_chunk(next);
        self.unlink(next as *mut FreeChunk);
        csz += next_size;
        write_header_preserving_prev(hdr, csz, true);
        write_footer(hdr, csz);
      }
    }

    if unsafe { !prev_in_use(hdr) }
      && let Some(prev) = unsafe { prev_if_free(hdr) }
    {
      unsafe {
        let prev_size = size_of_chunk(prev);
        self.unlink(prev as *mut FreeChunk);
        csz += prev_size;
        write_header_preserving_prev(prev, csz, true);
        write_footer(prev, csz);
        hdr = prev;
      }
    }

    hdr
  }

  /// Update the PREV-IN-USE bit of the chunk above `hdr`, iff that chunk
  /// lies in this reservation and below the frontier.
  unsafe fn set_next_prev_in_use(&mut self, hdr: *mut u8, in_use: bool) {
    let next = unsafe { next_chunk(hdr) };
    if self.contains(next) && next < self.bump {
      unsafe { set_prev_in_use(next, in_use) };
    }
  }

  // ===========================================================================
  // Free list
  // ===========================================================================

  unsafe fn unlink(&mut self, fc: *mut FreeChunk) {
    unsafe {
      let next = (*fc).links.next;
      let prev = (*fc).links.prev;
      if !prev.is_null() {
        (*prev).links.next = next;
      }
      if !next.is_null() {
        (*next).links.prev = prev;
      }
      if self.free_list == fc {
        self.free_list = next;
      }
      (*fc).links.next = null_mut();
      (*fc).links.prev = null_mut();
    }
  }

  unsafe fn push_front(&mut self, fc: *mut FreeChunk) {
    unsafe {
      (*fc).links.prev = null_mut();
      (*fc).links.next = self.free_list;
      if !self.free_list.is_null() {
        (*self.free_list).links.prev = fc;
      }
      self.free_list = fc;
    }
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    if !self.base.is_null() {
      unsafe { os_unmap(self.base, self.region) };
    }
  }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
impl Arena {
  /// Distance from base to the frontier.
  fn frontier_offset(&self) -> usize {
    self.bump as usize - self.base as usize
  }

  /// Whether the frontier has retracted all the way back to the first
  /// header position (the word below it is alignment padding).
  fn fully_retracted(&self) -> bool {
    self.frontier_offset() <= WORD
  }

  fn free_list_is_empty(&self) -> bool {
    self.free_list.is_null()
  }

  /// Walk the explored region and cross-check every structural invariant:
  /// the chunk walk partitions `[base + WORD, bump)` exactly, boundary
  /// tags agree between neighbors, no two adjacent chunks are free, no
  /// free chunk touches the frontier, and the free list reaches exactly
  /// the free chunks below it.
  fn check_integrity(&self) {
    use crate::chunk::{CHUNK_ALIGN, FREE_BIT, SIZE_MASK};
    use std::collections::HashSet;

    if self.bump == self.base {
      assert!(self.free_list.is_null(), "free list on an unexplored arena");
      return;
    }

    let mut free_below = HashSet::new();
    let mut hdr = unsafe { self.base.add(WORD) };
    let mut below_free: Option<bool> = None;

    while hdr < self.bump {
      let size = unsafe { size_of_chunk(hdr) };
      assert!(size >= MIN_FREE_CHUNK, "undersized chunk at {hdr:p}: {size}");
      assert_eq!(size % CHUNK_ALIGN, 0, "unaligned chunk size at {hdr:p}");

      let free = unsafe { is_free(hdr) };
      if let Some(below_free) = below_free {
        assert_eq!(
          unsafe { prev_in_use(hdr) },
          !below_free,
          "PREV-IN-USE out of sync at {hdr:p}"
        );
        assert!(!(below_free && free), "adjacent free chunks at {hdr:p}");
      }

      if free {
        let footer = unsafe { hdr.add(size).sub(WORD).cast::<usize>().read() };
        assert_eq!(footer & SIZE_MASK, size, "footer size mismatch at {hdr:p}");
        assert!(footer & FREE_BIT != 0, "footer FREE bit clear at {hdr:p}");
        assert!(
          unsafe { hdr.add(size) } < self.bump,
          "free chunk touching the frontier at {hdr:p}"
        );
        free_below.insert(hdr as usize);
      }

      below_free = Some(free);
      hdr = unsafe { hdr.add(size) };
    }
    assert_eq!(hdr, self.bump, "chunk walk does not land on the frontier");

    let mut listed = HashSet::new();
    let mut fc = self.free_list;
    while !fc.is_null() {
      assert!(self.contains(fc as *mut u8), "listed chunk outside arena");
      assert!(unsafe { is_free(fc as *mut u8) }, "in-use chunk on free list");
      assert!(listed.insert(fc as usize), "free-list cycle");
      fc = unsafe { (*fc).links.next };
    }
    assert_eq!(listed, free_below, "free list != free chunks below frontier");
  }
}

// =============================================================================
// Tests
// =============================================================================
