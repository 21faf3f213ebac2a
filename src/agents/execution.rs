//! 执行 Agent：按步骤分发到工具或直接推理
//!
//! tool_type = "none" 走直接推理；否则先做模板替换（{step_k_result}）与按工具类型的
//! 输入提取，再经 ToolHub 分发（按名失败后退化为按能力），每次分发带指数退避重试，
//! 终态错误不重试，重试耗尽降级为直接推理。输出按工具类型限长并在句边界截断。
//! 任何异常都折叠为 {success:false} 的 StepResult，绝不向上传播。

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::error::AgentError;
use crate::hub::{ToolHub, ToolResult};
use crate::llm::{GenerateOptions, LlmClient};
use crate::observability::Metrics;
use crate::prompts::PromptTable;
use crate::utils::{retry_with_backoff, BackoffPolicy};
use crate::workflow::types::{RunContext, Step, StepKind, StepResult};

/// 各工具类型的结果长度预算（字符）
fn max_len_for(tool_type: &str) -> usize {
    match tool_type {
        "calculate" => 100,
        "get_time" => 200,
        "search_web" => 500,
        "get_conversation_history" => 1000,
        _ => 500,
    }
}

/// 执行 Agent
pub struct ExecutionAgent {
    llm: Arc<dyn LlmClient>,
    hub: Arc<ToolHub>,
    prompts: Arc<PromptTable>,
    metrics: Arc<Metrics>,
    backoff: BackoffPolicy,
    opts: GenerateOptions,
}

impl ExecutionAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        hub: Arc<ToolHub>,
        prompts: Arc<PromptTable>,
        metrics: Arc<Metrics>,
        backoff: BackoffPolicy,
        opts: GenerateOptions,
    ) -> Self {
        Self {
            llm,
            hub,
            prompts,
            metrics,
            backoff,
            opts,
        }
    }

    /// 执行单个步骤；上下文视图为此前全部 StepResult 与路由产出
    pub async fn execute_step(
        &self,
        step: &Step,
        prior: &[StepResult],
        ctx: &RunContext,
    ) -> StepResult {
        if ctx.cancel.is_cancelled() {
            return StepResult::failed(step.id, "cancelled", "request cancelled");
        }

        let description = substitute_templates(&step.description, prior);
        match step.kind() {
            StepKind::DirectReasoning => self.direct_reason(step.id, &description, prior, ctx).await,
            StepKind::ToolInvocation(tool_type) => {
                let tool_type = tool_type.to_string();
                self.execute_with_tool(step.id, &tool_type, &description, prior, ctx)
                    .await
            }
        }
    }

    /// 直接推理：步骤描述 + 此前成功结果摘要
    async fn direct_reason(
        &self,
        step_id: u32,
        description: &str,
        prior: &[StepResult],
        ctx: &RunContext,
    ) -> StepResult {
        ctx.trace.on_reasoning_start(step_id, description);

        let context_info = format_context(prior);
        let prompt = self.prompts.render(
            "execution_direct_reasoning",
            &[("step_desc", description), ("context_info", &context_info)],
        );

        match self.llm.generate(&prompt, &self.opts).await {
            Ok(text) if !text.trim().is_empty() => {
                let answer = text.trim().to_string();
                ctx.trace.on_reasoning_end(step_id, true, &answer, None);
                StepResult {
                    step_id,
                    success: true,
                    result: Some(answer),
                    method: "direct_reasoning".to_string(),
                    error: None,
                    raw: None,
                }
            }
            Ok(_) => {
                ctx.trace
                    .on_reasoning_end(step_id, false, "", Some("empty reasoning result"));
                StepResult::failed(step_id, "direct_reasoning", "empty reasoning result")
            }
            Err(e) => {
                ctx.trace.on_reasoning_end(step_id, false, "", Some(&e.to_string()));
                StepResult::failed(step_id, "direct_reasoning", e.to_string())
            }
        }
    }

    /// 工具路径：输入提取 -> ToolHub 分发（带重试）-> 格式化输出
    async fn execute_with_tool(
        &self,
        step_id: u32,
        tool_type: &str,
        description: &str,
        prior: &[StepResult],
        ctx: &RunContext,
    ) -> StepResult {
        let input = prepare_tool_input(tool_type, description, prior);

        // 计算器拿不到表达式时直接降级推理，避免把自然语言喂给解析器
        if tool_type == "calculate" && input_is_empty(&input) {
            tracing::warn!(step_id, "empty calculator input, falling back to reasoning");
            return self.direct_reason(step_id, description, prior, ctx).await;
        }

        let input_preview = match &input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ctx.trace.on_tool_call_start(step_id, tool_type, &input_preview);

        let dispatched = retry_with_backoff(&self.backoff, |_attempt| {
            let input = input.clone();
            async move { self.dispatch_once(tool_type, description, input, ctx).await }
        })
        .await;

        match dispatched {
            Ok((result, method)) => {
                let formatted = format_tool_result(&result, tool_type);
                ctx.trace
                    .on_tool_call_end(step_id, tool_type, true, &formatted, None);
                StepResult {
                    step_id,
                    success: true,
                    result: Some(formatted),
                    method,
                    error: None,
                    raw: Some(result),
                }
            }
            Err(e) => {
                self.metrics.record_error(e.kind());
                ctx.trace
                    .on_tool_call_end(step_id, tool_type, false, "", Some(&e.to_string()));
                tracing::warn!(
                    step_id,
                    tool_type,
                    error = %e,
                    "tool dispatch exhausted, falling back to reasoning"
                );
                self.direct_reason(step_id, description, prior, ctx).await
            }
        }
    }

    /// 单次分发：按名执行，失败退化为按推断能力执行
    async fn dispatch_once(
        &self,
        tool_type: &str,
        description: &str,
        input: Value,
        ctx: &RunContext,
    ) -> Result<(ToolResult, String), AgentError> {
        if self.hub.has_tool(tool_type) {
            let result = self
                .hub
                .execute(tool_type, input.clone(), ctx.task_ctx.as_ref())
                .await;
            if result.success {
                return Ok((result, format!("toolhub_{}", tool_type)));
            }
            // 按名失败：先尝试按能力找功能相似工具，再决定是否重试
            if let Some(cap) = infer_capability(description, tool_type) {
                let by_cap = self
                    .hub
                    .execute_by_capability(&cap, input, ctx.task_ctx.as_ref())
                    .await;
                if by_cap.success {
                    return Ok((by_cap, format!("toolhub_capability_{}", cap)));
                }
            }
            return Err(classify_tool_error(&result));
        }

        let Some(cap) = infer_capability(description, tool_type) else {
            return Err(AgentError::ToolInvalidInput(format!(
                "tool_not_found: {}",
                tool_type
            )));
        };
        let result = self
            .hub
            .execute_by_capability(&cap, input, ctx.task_ctx.as_ref())
            .await;
        if result.success {
            return Ok((result, format!("toolhub_capability_{}", cap)));
        }
        Err(classify_tool_error(&result))
    }
}

fn input_is_empty(input: &Value) -> bool {
    match input {
        Value::String(s) => s.trim().is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// 工具失败分类：决定重试或终止
fn classify_tool_error(result: &ToolResult) -> AgentError {
    let msg = result.error.clone().unwrap_or_else(|| "tool_failed".into());
    let lower = msg.to_lowercase();
    if lower.contains("timeout") {
        AgentError::ToolTimeout(msg)
    } else if lower.contains("invalid")
        || lower.contains("empty")
        || lower.contains("no_match")
        || lower.contains("auth")
    {
        AgentError::ToolInvalidInput(msg)
    } else {
        AgentError::ToolExecution(msg)
    }
}

/// 此前成功步骤结果的摘要（结果入库时已按工具预算截断）
fn format_context(prior: &[StepResult]) -> String {
    prior
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| {
            r.result
                .as_ref()
                .map(|v| format!("步骤{}结果: {}", r.step_id, v))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 替换描述中的 {step_<k>_result} 占位符
pub fn substitute_templates(description: &str, prior: &[StepResult]) -> String {
    let re = Regex::new(r"\{step_(\d+)_result\}").expect("valid regex");
    re.replace_all(description, |caps: &regex::Captures| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|k| k.checked_sub(1))
            .and_then(|i| prior.get(i))
            .and_then(|r| r.result.clone())
            .unwrap_or_default()
    })
    .to_string()
}

/// 从步骤描述与工具名推断能力标签，用于「功能相似工具」兜底
pub fn infer_capability(description: &str, tool_type: &str) -> Option<String> {
    let desc = description.to_lowercase();
    let tool = tool_type.to_lowercase();
    let hit = |keywords: &[&str]| keywords.iter().any(|k| desc.contains(k) || tool.contains(k));

    if hit(&["搜索", "search", "查找", "检索", "查"]) {
        return Some("search".to_string());
    }
    if hit(&["计算", "算", "calculate", "calc", "compute", "math"]) {
        return Some("calculate".to_string());
    }
    if hit(&["时间", "time", "日期", "date", "几点"]) {
        return Some("time".to_string());
    }
    if hit(&["天气", "weather", "forecast", "预报"]) {
        return Some("weather".to_string());
    }
    if hit(&["pdf"]) {
        return Some("pdf".to_string());
    }
    if hit(&["文档", "document", "docx", "xlsx"]) {
        return Some("document".to_string());
    }
    if hit(&["测试", "test"]) {
        return Some("test".to_string());
    }
    if hit(&["历史", "history", "对话", "conversation"]) {
        return Some("history".to_string());
    }
    if hit(&["目录", "文件", "file", "folder", "directory", "list", "工作区"]) {
        return Some("filesystem".to_string());
    }
    if hit(&["地图", "map", "位置", "location"]) {
        return Some("map".to_string());
    }
    None
}

/// 按工具类型从步骤描述提取输入
pub fn prepare_tool_input(tool_type: &str, description: &str, prior: &[StepResult]) -> Value {
    match tool_type {
        "calculate" => {
            let re = Regex::new(r"[0-9+\-*/().\s]+").expect("valid regex");
            let expr = re
                .find_iter(description)
                .map(|m| m.as_str().trim())
                .filter(|s| s.len() > 2 && s.chars().any(|c| c.is_ascii_digit()))
                .max_by_key(|s| s.len());
            if let Some(expr) = expr {
                return json!(expr);
            }
            // 描述里没有表达式：回头找上一步产出的纯数值结果（排除日期）
            let date_re = Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("valid regex");
            let math_re = Regex::new(r"^[\d+\-*/().\s]+$").expect("valid regex");
            for r in prior.iter().rev().filter(|r| r.success) {
                if let Some(text) = &r.result {
                    let text = text.trim();
                    if !date_re.is_match(text) && math_re.is_match(text) {
                        return json!(text.chars().take(100).collect::<String>());
                    }
                }
            }
            json!("")
        }
        "search_web" => {
            let re = Regex::new(r"(?i)(搜索|查找|检索|search|query)\s*[：:]?\s*").expect("valid regex");
            let mut keywords = re.replace_all(description, "").trim().to_string();
            if keywords.is_empty() {
                // 二跳搜索：用上一步结果当 query
                for r in prior.iter().rev().filter(|r| r.success) {
                    if let Some(text) = &r.result {
                        if text.trim().chars().count() > 10 {
                            keywords = text.trim().chars().take(300).collect();
                            break;
                        }
                    }
                }
            }
            if keywords.is_empty() {
                keywords = description.to_string();
            }
            json!(keywords)
        }
        "get_time" => json!(description),
        "get_conversation_history" => {
            let lower = description.to_lowercase();
            let wants_last = ["最后", "最近", "上一条", "上一个", "刚刚", "刚才", "last", "previous"]
                .iter()
                .any(|k| lower.contains(k));
            if wants_last {
                if lower.contains("用户") || lower.contains("user") || lower.contains("问") {
                    json!("last_user")
                } else {
                    json!("last")
                }
            } else if ["全部", "所有", "all"].iter().any(|k| lower.contains(k)) {
                json!("all")
            } else {
                json!("10")
            }
        }
        _ => {
            // 其他工具：优先用上一步成功结果，否则用描述
            if let Some(r) = prior.iter().rev().find(|r| r.success) {
                if let Some(text) = &r.result {
                    if !text.trim().is_empty() {
                        return json!(text.chars().take(200).collect::<String>());
                    }
                }
            }
            json!(description)
        }
    }
}

/// 工具结果格式化：按类型取字段，再按预算在句边界截断
pub fn format_tool_result(result: &ToolResult, tool_type: &str) -> String {
    let max_len = max_len_for(tool_type);
    let value = result.result.clone().unwrap_or(Value::Null);

    let text = match tool_type {
        "search_web" => match value.get("results").and_then(|v| v.as_array()) {
            Some(items) if !items.is_empty() => items
                .iter()
                .take(3)
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                        r.get("snippet").and_then(|v| v.as_str()).unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => match &value {
                Value::String(s) => s.clone(),
                _ => "未找到相关信息".to_string(),
            },
        },
        "calculate" => value
            .get("formatted")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| result.text()),
        "get_time" => value
            .get("formatted")
            .or_else(|| value.get("current_time"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| result.text()),
        "get_conversation_history" => value
            .get("formatted")
            .or_else(|| value.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| result.text()),
        _ => result.text(),
    };

    truncate_at_sentence(&text, max_len)
}

/// 超预算时优先在句号 / 换行处截断（截断点不早于预算的 70%）
fn truncate_at_sentence(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    let window: String = chars[..max_len.saturating_sub(10)].iter().collect();
    let cut = window
        .rfind('。')
        .or_else(|| window.rfind('\n'))
        .filter(|pos| window[..*pos].chars().count() > max_len * 7 / 10);
    match cut {
        Some(pos) => {
            let end = pos + window[pos..].chars().next().map_or(0, |c| c.len_utf8());
            format!("{}...", &window[..end])
        }
        None => format!("{}...", window),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ToolCandidate, ToolSource};
    use crate::observability::{Metrics, TraceContext};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedTool {
        name: String,
        reply: Result<Value, String>,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "执行数学计算"
        }
        async fn execute(&self, _input: Value) -> Result<Value, String> {
            self.reply.clone()
        }
    }

    fn agent(hub: ToolHub, llm_reply: &str) -> ExecutionAgent {
        ExecutionAgent::new(
            Arc::new(crate::llm::MockLlm::new(llm_reply)),
            Arc::new(hub),
            Arc::new(PromptTable::builtin()),
            Arc::new(Metrics::new()),
            BackoffPolicy {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
            GenerateOptions::default(),
        )
    }

    fn hub_with_calc(reply: Result<Value, String>) -> ToolHub {
        let mut h = ToolHub::new(Duration::from_secs(2), Arc::new(Metrics::new()));
        h.register(ToolCandidate::from_tool(
            Arc::new(FixedTool {
                name: "calculate".into(),
                reply,
            }),
            ToolSource::Tools,
        ));
        h
    }

    fn step(id: u32, desc: &str, tool_type: &str) -> Step {
        Step {
            id,
            description: desc.into(),
            tool_type: tool_type.into(),
            dependencies: vec![],
            complexity: None,
            estimated_time: None,
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(Arc::new(TraceContext::disabled()))
    }

    #[test]
    fn test_prepare_calculator_input_extracts_expression() {
        let input = prepare_tool_input("calculate", "计算 2 + 3 * 4 的结果", &[]);
        assert_eq!(input.as_str().unwrap().trim(), "2 + 3 * 4");
    }

    #[test]
    fn test_prepare_calculator_input_from_prior_result() {
        let prior = vec![StepResult {
            step_id: 1,
            success: true,
            result: Some("128".into()),
            method: "toolhub_calculate".into(),
            error: None,
            raw: None,
        }];
        let input = prepare_tool_input("calculate", "把上一步结果翻倍", &prior);
        assert_eq!(input, json!("128"));
    }

    #[test]
    fn test_prepare_calculator_skips_date_results() {
        let prior = vec![StepResult {
            step_id: 1,
            success: true,
            result: Some("2026-08-02 10:00:00".into()),
            method: "toolhub_get_time".into(),
            error: None,
            raw: None,
        }];
        let input = prepare_tool_input("calculate", "算一下", &prior);
        assert_eq!(input, json!(""));
    }

    #[test]
    fn test_prepare_search_input_strips_verbs() {
        let input = prepare_tool_input("search_web", "搜索：Rust 异步运行时", &[]);
        assert_eq!(input, json!("Rust 异步运行时"));
    }

    #[test]
    fn test_prepare_history_input_classification() {
        assert_eq!(
            prepare_tool_input("get_conversation_history", "我上一个问题是什么", &[]),
            json!("last_user")
        );
        assert_eq!(
            prepare_tool_input("get_conversation_history", "列出全部对话", &[]),
            json!("all")
        );
        assert_eq!(
            prepare_tool_input("get_conversation_history", "看看对话历史", &[]),
            json!("10")
        );
    }

    #[test]
    fn test_substitute_templates() {
        let prior = vec![StepResult {
            step_id: 1,
            success: true,
            result: Some("14".into()),
            method: "toolhub_calculate".into(),
            error: None,
            raw: None,
        }];
        assert_eq!(
            substitute_templates("将 {step_1_result} 乘以 2", &prior),
            "将 14 乘以 2"
        );
        assert_eq!(substitute_templates("{step_9_result} 缺失", &prior), " 缺失");
    }

    #[test]
    fn test_truncate_at_sentence_boundary() {
        let text = format!("{}。结尾部分远超预算", "正文".repeat(60));
        let out = truncate_at_sentence(&text, 100);
        assert!(out.chars().count() <= 100);
        assert!(out.ends_with("..."));
    }

    #[tokio::test]
    async fn test_none_step_uses_reasoning() {
        let h = ToolHub::new(Duration::from_secs(1), Arc::new(Metrics::new()));
        let agent = agent(h, "Rust 是一门系统编程语言");
        let result = agent
            .execute_step(&step(1, "什么是 Rust?", "none"), &[], &ctx())
            .await;
        assert!(result.success);
        assert_eq!(result.method, "direct_reasoning");
        assert_eq!(result.result.as_deref(), Some("Rust 是一门系统编程语言"));
    }

    #[tokio::test]
    async fn test_tool_step_formats_calculator_output() {
        let h = hub_with_calc(Ok(json!({"result": 14.0, "formatted": "14"})));
        let agent = agent(h, "unused");
        let result = agent
            .execute_step(&step(1, "计算 2 + 3 * 4", "calculate"), &[], &ctx())
            .await;
        assert!(result.success);
        assert_eq!(result.result.as_deref(), Some("14"));
        assert_eq!(result.method, "toolhub_calculate");
    }

    #[tokio::test]
    async fn test_tool_failure_falls_back_to_reasoning() {
        let h = hub_with_calc(Err("invalid expression".into()));
        let agent = agent(h, "经推理得 14");
        let result = agent
            .execute_step(&step(1, "计算 2 + 3 * 4", "calculate"), &[], &ctx())
            .await;
        assert!(result.success);
        assert_eq!(result.method, "direct_reasoning");
    }

    #[tokio::test]
    async fn test_unknown_tool_without_capability_falls_back() {
        let h = ToolHub::new(Duration::from_secs(1), Arc::new(Metrics::new()));
        let agent = agent(h, "直接回答");
        let result = agent
            .execute_step(&step(1, "做点神秘的事", "mystery_tool"), &[], &ctx())
            .await;
        assert!(result.success);
        assert_eq!(result.method, "direct_reasoning");
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let h = ToolHub::new(Duration::from_secs(1), Arc::new(Metrics::new()));
        let agent = agent(h, "unused");
        let c = ctx();
        c.cancel.cancel();
        let result = agent
            .execute_step(&step(1, "任何步骤", "none"), &[], &c)
            .await;
        assert!(!result.success);
        assert_eq!(result.method, "cancelled");
    }

    #[test]
    fn test_classify_tool_error() {
        let timeout = ToolResult::failure("tool_timeout_after_10s");
        assert!(matches!(
            classify_tool_error(&timeout),
            AgentError::ToolTimeout(_)
        ));
        let invalid = ToolResult::failure("invalid character in expression");
        assert!(!classify_tool_error(&invalid).is_retryable());
        let generic = ToolResult::failure("boom");
        assert!(classify_tool_error(&generic).is_retryable());
    }
}
