//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::generate；错误按
//! timeout / connection / http / parse 分类，重试策略由调用方（core）决定，适配器本身不重试。

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use mock::MockLlm;
pub use openai::OpenAiLlm;

/// LLM 调用错误分类
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("llm request timeout")]
    Timeout,

    #[error("llm connection error: {0}")]
    Connection(String),

    #[error("llm http error {0}: {1}")]
    Http(u16, String),

    /// 响应体无法解析（非法 JSON / 空 choices 等）
    #[error("llm response parse error: {0}")]
    Parse(String),
}

impl LlmError {
    /// 超时与连接类可重试；4xx（认证、参数）与解析错误不重试，5xx 可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Connection(_) => true,
            LlmError::Http(status, _) => *status == 429 || *status >= 500,
            LlmError::Parse(_) => false,
        }
    }
}

/// 单次生成的采样与超时参数
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: std::time::Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
            timeout: std::time::Duration::from_secs(60),
        }
    }
}

/// LLM 客户端 trait：文本补全（prompt -> 文本）
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError>;
}
