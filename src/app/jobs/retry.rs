use rand::Rng;
use std::collections::BTreeMap;

use super::BackoffStrategy;

/// Hard cap on any computed retry delay, in seconds.
pub const MAX_DELAY_SECS: i64 = 3600;

/// Default jitter factor: delays are multiplied by a uniform value in
/// `[1 - j, 1 + j]`.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Pure mapping from (strategy, base delay, attempt) to a retry delay.
///
/// `attempt` is the number of attempts already made: 1 after the first
/// failure. Every result is clamped to `[0, MAX_DELAY_SECS]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER)
    }
}

impl RetryPolicy {
    pub fn new(jitter: f64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn without_jitter() -> Self {
        Self::new(0.0)
    }

    pub fn delay(&self, strategy: BackoffStrategy, base: i64, attempt: u32) -> i64 {
        let raw = Self::raw_delay(strategy, base, attempt);
        // Jitter is skipped for a zero base: the delay is exactly zero.
        let jittered = if self.jitter > 0.0 && base > 0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            (raw as f64 * factor).round() as i64
        } else {
            raw
        };
        jittered.clamp(0, MAX_DELAY_SECS)
    }

    /// The unjittered schedule for every attempt up to `max_attempts`,
    /// keyed by attempt number. Used for inspection and admin tooling.
    pub fn schedule(strategy: BackoffStrategy, base: i64, max_attempts: u32) -> BTreeMap<u32, i64> {
        (1..=max_attempts)
            .map(|attempt| (attempt, Self::raw_delay(strategy, base, attempt)))
            .collect()
    }

    fn raw_delay(strategy: BackoffStrategy, base: i64, attempt: u32) -> i64 {
        let base = base.max(0);
        let attempt = attempt.max(1);
        let delay = match strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt as i64),
            BackoffStrategy::Exponential => {
                let shift = (attempt - 1).min(32);
                base.saturating_mul(1_i64 << shift)
            }
        };
        delay.min(MAX_DELAY_SECS)
    }
}
