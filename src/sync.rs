//! Spin-based mutual exclusion guarding arena state.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A test-and-test-and-set spinlock with an RAII guard. Critical sections
/// here are short and never block on anything but the lock itself.
pub struct SpinMutex<T> {
  locked: AtomicBool,
  value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
  pub const fn new(value: T) -> Self {
    Self {
      locked: AtomicBool::new(false),
      value: UnsafeCell::new(value),
    }
  }

  #[inline]
  pub fn lock(&self) -> SpinMutexGuard<'_, T> {
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        hint::spin_loop();
      }
    }
    SpinMutexGuard { lock: self }
  }
}

pub struct SpinMutexGuard<'a, T> {
  lock: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &T {
    unsafe { &*self.lock.value.get() }
  }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
  #[inline]
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.lock.value.get() }
  }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
  #[inline]
  fn drop(&mut self) {
    self.lock.locked.store(false, Ordering::Release);
  }
}
