//! Module `latch` implement a read-write latch-and-spin primitive, for
//! non-blocking concurrency over short critical sections.
//!
//! Readers and writers spin instead of parking. Useful when the guarded
//! work is a handful of loads/stores, like swapping a catalog snapshot or
//! touching one shard of the lock table. Writers latch first, then wait
//! for in-flight readers to drain before locking.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, AtomicU64, Ordering::SeqCst},
    thread,
};

// latchlock bits: [0-29] reader count, bit-30 latch, bit-31 lock.
const LATCH_FLAG: u32 = 0x4000_0000;
const LOCK_FLAG: u32 = 0x8000_0000;
const LATCH_LOCK_FLAG: u32 = 0xC000_0000;
const READERS_FLAG: u32 = 0x3FFF_FFFF;

/// Latch guarding a value of type `T`, shared across threads.
pub struct Latch<T> {
    latchlock: AtomicU32,
    conflicts: AtomicU64,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Latch<T> {}
unsafe impl<T: Send + Sync> Sync for Latch<T> {}

impl<T> Latch<T> {
    pub fn new(value: T) -> Latch<T> {
        Latch {
            latchlock: AtomicU32::new(0),
            conflicts: AtomicU64::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire shared read permission.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & LATCH_LOCK_FLAG) == 0 {
                // no writer has latched the value
                if self
                    .latchlock
                    .compare_exchange(old, old + 1, SeqCst, SeqCst)
                    .is_ok()
                {
                    break ReadGuard { door: self };
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
            thread::yield_now();
        }
    }

    /// Acquire exclusive write permission.
    pub fn write(&self) -> WriteGuard<T> {
        // latch, keeping new readers out
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & LATCH_FLAG) == 0 {
                if self
                    .latchlock
                    .compare_exchange(old, old | LATCH_FLAG, SeqCst, SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
            thread::yield_now();
        }
        // lock, once in-flight readers have drained
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & READERS_FLAG) == 0 {
                if self
                    .latchlock
                    .compare_exchange(old, old | LOCK_FLAG, SeqCst, SeqCst)
                    .is_ok()
                {
                    break WriteGuard { door: self };
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
            thread::yield_now();
        }
    }

    /// Number of times a reader/writer had to spin, so far.
    pub fn to_conflicts(&self) -> u64 {
        self.conflicts.load(SeqCst)
    }
}

pub struct ReadGuard<'a, T> {
    door: &'a Latch<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

pub struct WriteGuard<'a, T> {
    door: &'a Latch<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.door.value.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_and(!LATCH_LOCK_FLAG, SeqCst);
    }
}

#[cfg(test)]
#[path = "latch_test.rs"]
mod latch_test;
