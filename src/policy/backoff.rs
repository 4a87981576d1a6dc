use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule with additive uniform jitter.
///
/// The deterministic part of the delay after attempt `k` is
/// `base_delay * 2^(k-1)`, optionally capped by `max_delay`. A jitter sampled
/// uniformly from `[0, max_jitter)` is added on top so concurrent callers do
/// not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    base_delay: Duration,
    max_jitter: Duration,
    max_delay: Option<Duration>,
}

impl BackoffSchedule {
    pub fn new(base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            max_jitter,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Lower bound of the delay scheduled after the given (1-based) attempt.
    pub fn floor(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(multiplier);

        match self.max_delay {
            Some(cap) if delay > cap => cap,
            _ => delay,
        }
    }

    /// Delay to wait before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.floor(attempt).saturating_add(sample_jitter(self.max_jitter))
    }
}

fn sample_jitter(max_jitter: Duration) -> Duration {
    let upper = max_jitter.as_nanos().min(u128::from(u64::MAX)) as u64;
    if upper == 0 {
        return Duration::ZERO;
    }

    let mut rng = rand::rng();
    Duration::from_nanos(rng.random_range(0..upper))
}
