//! 重试策略：最大尝试次数与指数退避
//!
//! 第 n 次（从 0 计）尝试失败后、发起下一次尝试前等待 `backoff_base * 2^n`；
//! 最后一次失败后不再等待。

use std::time::Duration;

use crate::config::RetrySection;

/// 退避指数上限，避免 2^n 溢出
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub fn from_config(cfg: &RetrySection) -> Self {
        Self::new(cfg.max_attempts, Duration::from_millis(cfg.backoff_base_ms))
    }

    /// 第 `attempt` 次失败后的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.backoff_base.saturating_mul(factor)
    }

    /// 第 `attempt` 次失败后是否还有下一次
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}
