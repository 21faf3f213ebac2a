//! 指标统计：请求 / LLM / 工具计数与按错误类别的计数
//!
//! 全部为原子加法，无锁读取；to_json 供 /health 输出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 请求相关指标
#[derive(Debug, Default)]
pub struct RequestMetrics {
    pub total: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub cache_hits: AtomicU64,
    pub fast_path_hits: AtomicU64,
}

impl RequestMetrics {
    pub fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// LLM 调用指标
#[derive(Debug, Default)]
pub struct LlmMetrics {
    pub total_calls: AtomicU64,
    pub failed_calls: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

impl LlmMetrics {
    pub fn record_call(&self, success: bool, latency: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.total_calls.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }
}

/// 工具执行指标
#[derive(Debug, Default)]
pub struct ToolMetrics {
    pub total_executions: AtomicU64,
    pub failed_executions: AtomicU64,
    pub timeouts: AtomicU64,
    pub cancellations: AtomicU64,
    pub total_execution_time_ms: AtomicU64,
}

impl ToolMetrics {
    pub fn record_execution(&self, success: bool, duration: Duration) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        self.total_execution_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

/// 全局指标收集器：按错误 kind 计数走一把小锁（低频路径）
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests: RequestMetrics,
    pub llm: LlmMetrics,
    pub tools: ToolMetrics,
    errors_by_kind: Mutex<HashMap<&'static str, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, kind: &'static str) {
        let mut guard = self.errors_by_kind.lock().expect("metrics lock poisoned");
        *guard.entry(kind).or_insert(0) += 1;
    }

    pub fn to_json(&self) -> serde_json::Value {
        let errors: HashMap<&'static str, u64> = self
            .errors_by_kind
            .lock()
            .expect("metrics lock poisoned")
            .clone();
        serde_json::json!({
            "requests": {
                "total": self.requests.total.load(Ordering::Relaxed),
                "succeeded": self.requests.succeeded.load(Ordering::Relaxed),
                "failed": self.requests.failed.load(Ordering::Relaxed),
                "cache_hits": self.requests.cache_hits.load(Ordering::Relaxed),
                "fast_path_hits": self.requests.fast_path_hits.load(Ordering::Relaxed),
            },
            "llm": {
                "total_calls": self.llm.total_calls.load(Ordering::Relaxed),
                "failed_calls": self.llm.failed_calls.load(Ordering::Relaxed),
                "average_latency_ms": self.llm.average_latency_ms(),
            },
            "tools": {
                "total_executions": self.tools.total_executions.load(Ordering::Relaxed),
                "failed_executions": self.tools.failed_executions.load(Ordering::Relaxed),
                "timeouts": self.tools.timeouts.load(Ordering::Relaxed),
                "cancellations": self.tools.cancellations.load(Ordering::Relaxed),
                "total_execution_time_ms": self.tools.total_execution_time_ms.load(Ordering::Relaxed),
            },
            "errors": errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let m = Metrics::new();
        m.requests.record(true);
        m.requests.record(false);
        assert_eq!(m.requests.total.load(Ordering::Relaxed), 2);
        assert_eq!(m.requests.failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_error_kind_counters() {
        let m = Metrics::new();
        m.record_error("tool_timeout");
        m.record_error("tool_timeout");
        m.record_error("plan");
        let json = m.to_json();
        assert_eq!(json["errors"]["tool_timeout"], 2);
        assert_eq!(json["errors"]["plan"], 1);
    }

    #[test]
    fn test_llm_average_latency() {
        let m = LlmMetrics::default();
        m.record_call(true, Duration::from_millis(100));
        m.record_call(false, Duration::from_millis(200));
        assert_eq!(m.average_latency_ms(), 150.0);
    }
}
