use super::RetryPolicy;
use std::time::Duration;

/// 线性退避重试策略
///
/// 等待时长 = 基础时长 × 连续失败次数
pub struct LinearBackoffPolicy {
    max_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl LinearBackoffPolicy {
    pub fn new(max_failures: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_failures,
            base_delay,
            max_delay,
        }
    }
}

impl RetryPolicy for LinearBackoffPolicy {
    fn backoff_duration(&self, failures: u32) -> Duration {
        let failures = failures.clamp(1, self.max_failures.max(1));
        self.base_delay.saturating_mul(failures).min(self.max_delay)
    }

    fn max_failures(&self) -> u32 {
        self.max_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth() {
        let policy =
            LinearBackoffPolicy::new(15, Duration::from_secs(3), Duration::from_secs(45));
        assert_eq!(policy.backoff_duration(0), Duration::from_secs(3));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(6));
        assert_eq!(policy.backoff_duration(15), Duration::from_secs(45));
        assert_eq!(policy.backoff_duration(40), Duration::from_secs(45));
    }
}
