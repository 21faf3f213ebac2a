//! 工具契约与内置工具
//!
//! 所有工具实现 Tool trait（name / description / capabilities / execute）。
//! 核心只依赖这一统一契约：输入输出均为 JSON Value，由 ToolHub 统一加超时、
//! 包装为 ToolResult。工具代码拿不到任何全局可变状态，只收到自己的输入。

pub mod calculator;
pub mod clock;
pub mod history;
pub mod search;
pub mod workspace;

use async_trait::async_trait;
use serde_json::Value;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use history::ConversationHistoryTool;
pub use search::WebSearchTool;
pub use workspace::WorkspaceFilesTool;

/// 工具 trait：名称、描述（供 LLM 理解）、能力标签、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// 能力标签（如 ["search", "web"]）；为空时由 ToolHub 从描述中提取
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// 执行工具；Err 为面向调用方的错误描述
    async fn execute(&self, input: Value) -> Result<Value, String>;
}

/// 工具输入按字符串取值的便捷函数（Value::String 直取，其余序列化）
pub fn input_as_str(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
