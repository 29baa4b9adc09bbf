//! Time source
//!
//! Every `time` field the engine emits comes from a [`Clock`] in whole
//! milliseconds.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond clock
pub trait Clock {
    fn now(&self) -> u64;
}

/// Wall clock, milliseconds since creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Host-driven clock. Clones share the same time.
///
/// With a non-zero step every reading advances the clock, which makes
/// budget exhaustion reproducible.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    step: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that advances `step` ms after every reading
    pub fn stepping(step: u64) -> Self {
        let clock = Self::default();
        clock.step.set(step);
        clock
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set_step(&self, step: u64) {
        self.step.set(step);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step.get());
        now
    }
}
