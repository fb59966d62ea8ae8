// Fixed-timestep accumulator for the hub's tick loop.
//
// Each call measures the real time elapsed since the previous one, adds it to
// a lag budget and returns how many whole ticks fit. When the loop falls
// behind, the next call returns several ticks to run back-to-back, but never
// more than real elapsed time justifies.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct FixedStep {
    step: Duration,
    last: Instant,
    lag: Duration,
}

impl FixedStep {
    pub fn new(tick_rate: u32, now: Instant) -> Self {
        let step = Duration::from_secs(1) / tick_rate.max(1);
        Self {
            step,
            last: now,
            lag: Duration::ZERO,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Ticks owed as of `now`.
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        self.lag += now.saturating_duration_since(self.last);
        self.last = now;
        let mut due = 0;
        while self.lag >= self.step {
            self.lag -= self.step;
            due += 1;
        }
        due
    }

    /// Time until the next tick is owed.
    pub fn until_next(&self) -> Duration {
        self.step.saturating_sub(self.lag)
    }
}
