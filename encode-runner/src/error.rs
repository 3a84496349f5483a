// 编码会话错误类型
//
// 定义编码驱动过程中可能出现的错误，以及瞬时错误的重试策略。

use common::CodecError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 编码会话错误
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to open frame source {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("No matching codecs to: {0}")]
    NoMatchingCodec(String),

    #[error("Ambiguous codec '{id}', candidates: {}", .candidates.join(", "))]
    AmbiguousCodec { id: String, candidates: Vec<String> },

    #[error("Failed to create codec {name}: {source}")]
    DeviceCreate {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("Failed to configure {name}: {reason}")]
    Configure { name: String, reason: String },

    #[error("Failed to start {name}: {reason}")]
    Start { name: String, reason: String },

    #[error("Input buffer {index} still rejected after {attempts} attempts: {last_error}")]
    QueueRetriesExhausted {
        index: usize,
        attempts: u32,
        last_error: String,
    },

    #[error("No codec progress for {idle_ms} ms while running")]
    Stalled { idle_ms: u64 },

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Frame of {frame_bytes} bytes does not fit input buffer of {slot_bytes} bytes")]
    FrameTooLarge { frame_bytes: usize, slot_bytes: usize },

    #[error("Codec error: {0}")]
    Device(#[from] CodecError),
}

/// 重试退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// 立即重试
    Immediate,
    /// 线性退避
    Linear,
    /// 指数退避
    Exponential,
}

/// 瞬时排队错误的重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 基础退避时间
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub backoff_base: Duration,
    /// 最大退避时间
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            strategy: RetryStrategy::Exponential,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// 计算第 `attempt` 次重试前的等待时间（从0开始）
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Immediate => Duration::ZERO,

            RetryStrategy::Linear => {
                let delay = self.backoff_base.saturating_mul(attempt.saturating_add(1));
                delay.min(self.backoff_max)
            }

            RetryStrategy::Exponential => {
                let multiplier = 2u32.saturating_pow(attempt);
                let delay = self.backoff_base.saturating_mul(multiplier);
                delay.min(self.backoff_max)
            }
        }
    }

    /// 判断是否应该重试
    pub fn should_retry(&self, error: &CodecError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            strategy,
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            DriverError::NoMatchingCodec("av1".to_string()),
            DriverError::AmbiguousCodec {
                id: "sim".to_string(),
                candidates: vec!["sim.avc.encoder".to_string(), "sim.vp8.encoder".to_string()],
            },
            DriverError::Stalled { idle_ms: 2000 },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }

        assert_eq!(
            DriverError::NoMatchingCodec("av1".to_string()).to_string(),
            "No matching codecs to: av1"
        );
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let error = DriverError::AmbiguousCodec {
            id: "enc".to_string(),
            candidates: vec!["a.enc".to_string(), "b.enc".to_string()],
        };
        assert!(error.to_string().contains("a.enc, b.enc"));
    }

    #[test]
    fn test_retry_policy_immediate() {
        let policy = policy(RetryStrategy::Immediate);
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_linear() {
        let policy = policy(RetryStrategy::Linear);
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(30));
    }

    #[test]
    fn test_retry_policy_exponential_capped() {
        let policy = policy(RetryStrategy::Exponential);
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(80));
        // 应该被限制在最大值
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(40), Duration::from_millis(100));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let transient = CodecError::BufferNotReady("slot 0".to_string());

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 4));
        // 超过最大重试次数
        assert!(!policy.should_retry(&transient, 5));
        // 不可重试的错误
        assert!(!policy.should_retry(&CodecError::InvalidBufferIndex(3), 0));
    }
}
