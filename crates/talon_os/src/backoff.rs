//! Exponential backoff helper for the scheduler's `wait_task` helper loop:
//! spin briefly while a ready task is expected soon, then fall back to
//! yielding the OS thread.
//!
//! See <https://docs.rs/crate/crossbeam-utils/latest>.

use std::cell::Cell;

/// The maximum exponent of spin count.
const SPIN_LIMIT: u32 = 5;

/// Performs exponential backoff in spin loops.
///
/// Each step of the backoff procedure takes roughly twice as long as the
/// previous one; once the spin budget is exhausted, [`Self::snooze`] falls
/// back to yielding the current thread to the OS scheduler.
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    /// Creates a new `Backoff`.
    #[inline(always)]
    pub const fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    /// Resets the backoff state back to its initial, most eager step.
    #[inline(always)]
    pub fn reset(&self) {
        self.step.set(0);
    }

    /// Backs off in a lock-free loop, spinning the CPU without yielding
    /// the thread.
    #[inline]
    pub fn spin(&self) {
        let step: u32 = 1 << self.step.get();
        for _ in 0..step {
            core::hint::spin_loop();
        }

        if self.step.get() < SPIN_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }

    /// Backs off in a blocking loop: spins for a handful of iterations,
    /// then yields the thread to the OS scheduler once the spin budget is
    /// exhausted.
    #[inline]
    pub fn snooze(&self) {
        if self.step.get() < SPIN_LIMIT {
            let step: u32 = 1 << self.step.get();
            for _ in 0..step {
                core::hint::spin_loop();
            }
            self.step.set(self.step.get() + 1);
        } else {
            std::thread::yield_now();
        }
    }
}

impl Default for Backoff {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}
