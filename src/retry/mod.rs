//! 重试退避策略模块
//!
//! 监听循环在协调服务调用失败后按策略退避，失败计数有上限以限制最长等待时间

pub mod exponential;
pub mod linear;

pub use exponential::ExponentialBackoffPolicy;
pub use linear::LinearBackoffPolicy;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 最大连续失败计数
pub const MAX_FAIL_TIMES: u32 = 15;

/// 默认重连退避基础时长
pub const DEFAULT_CONN_DELAY: Duration = Duration::from_secs(3);

/// 重试退避策略 trait
pub trait RetryPolicy: Send + Sync {
    /// 连续失败 `failures` 次后应等待的时长
    fn backoff_duration(&self, failures: u32) -> Duration;

    /// 失败计数上限
    fn max_failures(&self) -> u32;

    /// 记录一次失败，返回封顶后的失败计数
    fn next_failures(&self, failures: u32) -> u32 {
        failures.saturating_add(1).min(self.max_failures())
    }
}

/// 退避策略类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// 与失败次数成正比
    #[default]
    Linear,
    /// 指数增长
    Exponential,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" | "proportional" => Ok(BackoffStrategy::Linear),
            "exponential" | "exp" => Ok(BackoffStrategy::Exponential),
            _ => Err(format!("Unknown backoff strategy: {}", s)),
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 退避策略
    pub strategy: BackoffStrategy,
    /// 基础等待时长（毫秒）
    pub base_delay_ms: u64,
    /// 单次最长等待时长（毫秒）
    pub max_delay_ms: u64,
    /// 失败计数上限
    pub max_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base_delay_ms: DEFAULT_CONN_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_CONN_DELAY.as_millis() as u64 * MAX_FAIL_TIMES as u64,
            max_failures: MAX_FAIL_TIMES,
        }
    }
}

impl RetryConfig {
    /// 设置退避策略
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 设置基础等待时长
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// 设置单次最长等待时长
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// 设置失败计数上限
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// 根据配置构建策略
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        let base = Duration::from_millis(self.base_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        match self.strategy {
            BackoffStrategy::Linear => {
                Arc::new(LinearBackoffPolicy::new(self.max_failures, base, max))
            }
            BackoffStrategy::Exponential => {
                Arc::new(ExponentialBackoffPolicy::new(self.max_failures, base, max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_is_capped() {
        let policy = RetryConfig::default().build();
        let mut failures = 0;
        for _ in 0..100 {
            failures = policy.next_failures(failures);
        }
        assert_eq!(failures, MAX_FAIL_TIMES);
    }

    #[test]
    fn test_build_from_strategy() {
        let config = RetryConfig::default()
            .with_strategy(BackoffStrategy::Exponential)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100));
        let policy = config.build();
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(20));
        assert_eq!(policy.backoff_duration(10), Duration::from_millis(100));

        assert_eq!("exp".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Exponential));
        assert!("random".parse::<BackoffStrategy>().is_err());
    }
}
