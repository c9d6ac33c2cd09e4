use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

const BACKOFF_BASE: u64 = 5;
const BACKOFF_UNIT: Duration = Duration::from_secs(60);

/// Coarse exponential backoff: the n-th retry (zero based) waits `5^(n+1)` minutes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: u64,
    unit: Duration,
    max_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new(base: u64, unit: Duration) -> Self {
        Self {
            base: base.max(1),
            unit,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self
            .base
            .checked_pow(retry.saturating_add(1))
            .unwrap_or(u64::MAX);
        let factor = u32::try_from(factor).unwrap_or(u32::MAX);
        let delay = self.unit.saturating_mul(factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Decides what happens after a failed attempt. `attempts_made` counts the
    /// attempt that just failed.
    pub fn decide(&self, attempts_made: i32, max_attempts: i32) -> RetryDecision {
        if attempts_made < max_attempts {
            let retry = u32::try_from(attempts_made.saturating_sub(1)).unwrap_or(0);
            RetryDecision::RetryAfter(self.backoff(retry))
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BACKOFF_BASE, BACKOFF_UNIT)
    }
}
