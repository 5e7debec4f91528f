use std::time::Duration;

use rand::Rng;

/// Retry delays for quote polling and outcome writes: the base delay doubles
/// per attempt up to `max_delay`, then gets scaled by a random factor in
/// `1 +/- jitter_factor` so stalled orders don't retry in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// `jitter_factor` is clamped to `0.0..=1.0`.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter_factor == 0.0 || delay.is_zero() {
            return delay;
        }
        let scale = rand::thread_rng().gen_range(1.0 - self.jitter_factor..=1.0 + self.jitter_factor);
        delay.mul_f64(scale)
    }

    /// Call after a successful quote.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
