use tokio::time::Duration;

/// Capped exponential delay: `base * 2^(attempt - 1)`, never above `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `attempt` is 1-based.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << shift).min(self.cap)
    }
}

/// `base * attempt`, used by the event fetcher between transient failures.
pub fn linear_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}
