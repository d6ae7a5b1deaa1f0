use super::RetryPolicy;
use std::time::Duration;

/// 指数退避重试策略
pub struct ExponentialBackoffPolicy {
    max_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_failures: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_failures,
            base_delay,
            max_delay,
        }
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn backoff_duration(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(10);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn max_failures(&self) -> u32 {
        self.max_failures
    }
}
