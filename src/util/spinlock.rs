//! Module `spinlock` implement latch-and-spin mutual exclusion, useful
//! for short critical sections like registry lookups and write-ahead
//! buffer updates, where parking the thread costs more than spinning.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
    thread,
};

/// Spinlock implements latch-and-spin mutual exclusion over value `T`.
///
/// Threads that fail to latch shall spin, yielding to the scheduler
/// after every failed attempt.
pub struct Spinlock<T> {
    latch: AtomicBool,
    conflicts: AtomicUsize,
    value: UnsafeCell<T>,
}

// Spinlock guarantees exclusive access to `value`.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latch: AtomicBool::new(false),
            conflicts: AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire exclusive access to the underlying value. Guard shall
    /// release the latch when dropped.
    pub fn lock(&self) -> Guard<T> {
        loop {
            match self.latch.compare_exchange(false, true, SeqCst, SeqCst) {
                Ok(_) => break Guard { door: self },
                Err(_) => {
                    self.conflicts.fetch_add(1, SeqCst);
                    thread::yield_now();
                }
            }
        }
    }

    /// Number of times a thread found the latch held by another.
    pub fn to_conflicts(&self) -> usize {
        self.conflicts.load(SeqCst)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

pub struct Guard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for Guard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> DerefMut for Guard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.door.value.get() }
    }
}

impl<'a, T> Drop for Guard<'a, T> {
    fn drop(&mut self) {
        self.door.latch.store(false, SeqCst);
    }
}

#[cfg(test)]
#[path = "spinlock_test.rs"]
mod spinlock_test;
