//! Agent 错误类型
//!
//! 错误最多跨一层组件边界：在各结果对象中转为 {success:false, error}，请求永不以未捕获异常结束。
//! `kind()` 给指标按错误类别计数用。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（输入、LLM、工具、规划、能力缺失、超时）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 问题为空或超长，HTTP 层映射为 400，不重试
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// 工具输入无效（如计算器拿到空表达式），属终态错误，不重试
    #[error("Invalid tool input: {0}")]
    ToolInvalidInput(String),

    /// LLM 返回的计划无法解析，上层降级为单步计划
    #[error("Plan parse failed: {0}")]
    Plan(String),

    /// 没有工具匹配请求的能力标签
    #[error("No tool matches capability: {0}")]
    CapabilityMiss(String),

    /// 请求总超时，HTTP 层映射为 504
    #[error("Task deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// 错误类别名，用于指标计数与 trace
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Input(_) => "input",
            AgentError::Llm(LlmError::Timeout) => "llm_timeout",
            AgentError::Llm(LlmError::Connection(_)) => "llm_connection",
            AgentError::Llm(LlmError::Http(_, _)) => "llm_http",
            AgentError::Llm(LlmError::Parse(_)) => "llm_parse",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::ToolExecution(_) => "tool_execution",
            AgentError::ToolInvalidInput(_) => "tool_invalid_input",
            AgentError::Plan(_) => "plan",
            AgentError::CapabilityMiss(_) => "capability_miss",
            AgentError::DeadlineExceeded => "deadline",
            AgentError::Internal(_) => "internal",
        }
    }

    /// 是否值得重试：输入类 / 认证类 / 规划类为终态，网络与超时类可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Input(_)
            | AgentError::ToolInvalidInput(_)
            | AgentError::Plan(_)
            | AgentError::CapabilityMiss(_)
            | AgentError::DeadlineExceeded => false,
            AgentError::Llm(e) => e.is_retryable(),
            AgentError::ToolTimeout(_) | AgentError::ToolExecution(_) | AgentError::Internal(_) => {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(AgentError::Input("empty".into()).kind(), "input");
        assert_eq!(AgentError::DeadlineExceeded.kind(), "deadline");
        assert_eq!(AgentError::Llm(LlmError::Timeout).kind(), "llm_timeout");
    }

    #[test]
    fn test_retry_classification() {
        assert!(!AgentError::ToolInvalidInput("empty expression".into()).is_retryable());
        assert!(AgentError::ToolTimeout("search_web".into()).is_retryable());
        assert!(!AgentError::Llm(LlmError::Http(401, "unauthorized".into())).is_retryable());
        assert!(AgentError::Llm(LlmError::Connection("refused".into())).is_retryable());
    }
}
