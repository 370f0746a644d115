//! Monotonic timer used for animation and frame statistics.

use std::time::{Duration, Instant};

/// Measures time since creation and between ticks.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Seconds elapsed since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Time elapsed since the previous call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
