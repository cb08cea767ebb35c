//! Clock source consumed by the engine.
//!
//! The core treats time as an external, read-only collaborator: a
//! monotonically non-decreasing count of seconds since some epoch chosen by
//! the caller. `SystemClock` measures seconds since it was constructed;
//! `ManualClock` lets tests drive expiry deterministically without sleeping.

use std::cell::Cell;
use std::time::Instant;

/// `now_sec()`, monotonically non-decreasing seconds since process start.
pub trait Clock {
    fn now_sec(&self) -> u32;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_sec(&self) -> u32 {
        self.start.elapsed().as_secs() as u32
    }
}

/// Test clock: time only moves when told to.
pub struct ManualClock {
    now: Cell<u32>,
}

impl ManualClock {
    pub fn new(start_sec: u32) -> Self {
        Self {
            now: Cell::new(start_sec),
        }
    }

    pub fn set(&self, sec: u32) {
        self.now.set(sec);
    }

    pub fn advance(&self, secs: u32) {
        self.now.set(self.now.get() + secs);
    }
}

impl Clock for ManualClock {
    fn now_sec(&self) -> u32 {
        self.now.get()
    }
}
