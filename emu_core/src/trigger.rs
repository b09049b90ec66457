//! The wake trigger shared by the time-control thread and all waiters.
//!
//! A condition variable with a published generation counter: waiters pass
//! the generation they have already seen and block until it advances.
//! This is the portable rendering of a futex word: `pulse` is the wake,
//! `wait` the futex-wait on "value changed".

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Generation-counter trigger.
pub struct Trigger {
    /// Lock-free mirror of the generation for cheap reads.
    seq: AtomicU32,
    /// Authoritative generation, guarded for sleep/wake.
    r#gen: Mutex<u32>,
    cond: Condvar,
}

impl Trigger {
    pub fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            r#gen: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// The generation a waiter should pass to the next `wait`.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// Advance the generation and wake every waiter.
    pub fn pulse(&self) {
        let mut r#gen = self.r#gen.lock();
        *r#gen = r#gen.wrapping_add(1);
        self.seq.store(*r#gen, Ordering::Release);
        self.cond.notify_all();
    }

    /// Block until the generation differs from `seen`; returns the new
    /// generation.
    pub fn wait(&self, seen: u32) -> u32 {
        let mut r#gen = self.r#gen.lock();
        while *r#gen == seen {
            self.cond.wait(&mut r#gen);
        }
        *r#gen
    }

    /// Like [`wait`](Self::wait) but bounded; returns the current
    /// generation whether or not it advanced.
    pub fn wait_timeout(&self, seen: u32, timeout: Duration) -> u32 {
        let mut r#gen = self.r#gen.lock();
        if *r#gen == seen {
            self.cond.wait_for(&mut r#gen, timeout);
        }
        *r#gen
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}
