//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按「提示词包含子串 -> 固定回复」的规则表应答，便于脚本化规划 / 推理 / 综合各环节；
//! 未命中规则时返回默认回复，并累计调用次数供断言。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::llm::{GenerateOptions, LlmClient, LlmError};

/// Mock 客户端：规则表 + 默认回复
pub struct MockLlm {
    rules: Vec<(String, String)>,
    default_reply: String,
    calls: AtomicU64,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new("mock reply")
    }
}

impl MockLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
            calls: AtomicU64::new(0),
        }
    }

    /// 追加一条规则：提示词包含 needle 时返回 reply（按插入顺序匹配，先到先得）
    pub fn stub(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// 累计调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        for (needle, reply) in &self.rules {
            if prompt.contains(needle.as_str()) {
                return Ok(reply.clone());
            }
        }
        Ok(self.default_reply.clone())
    }
}
