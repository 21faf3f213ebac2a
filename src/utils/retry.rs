//! 重试：指数退避 + 抖动
//!
//! 终态错误（无效输入、认证失败等）立刻放弃，由 AgentError::is_retryable 判定；
//! 其余错误按 initial * factor^attempt 退避，封顶 max_delay，叠加 ±20% 抖动避免雷群。

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::error::AgentError;

/// 退避参数；Default 即工具调用用的 0.5s 起步、2 倍增长、5s 封顶
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// 抖动比例（0.2 = ±20%）
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 第 attempt 次失败后的等待时长（含抖动）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        // 无 rand 依赖的轻量抖动：取当前时刻亚秒纳秒数折算到 [-1, 1]
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let unit = (nanos as f64 / 1e9) * 2.0 - 1.0;
        let jittered = capped * (1.0 + unit * self.jitter_ratio);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// 执行 op 直至成功或耗尽重试；op 接收当前尝试序号（从 0 起）
pub async fn retry_with_backoff<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T, AgentError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = BackoffPolicy {
            jitter_ratio: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        // 0.5 * 2^5 = 16s，封顶 5s
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..4 {
            let base = 0.5f64 * 2f64.powi(attempt).min(10.0);
            let capped = base.min(5.0);
            let d = policy.delay_for(attempt as u32).as_secs_f64();
            assert!(d >= capped * 0.8 - 1e-9 && d <= capped * 1.2 + 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&BackoffPolicy::default(), |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AgentError::ToolExecution("flaky".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&BackoffPolicy::default(), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::ToolInvalidInput("empty".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
