//! 任务先验路由
//!
//! 规划前对用户输入做一次 LLM 判断：是否需要工具、能力标签、属性标签、适配载体。
//! 路由器本身无状态；任何解析失败都退回默认上下文（use_tools=true、全 medium），
//! 绝不阻断主流程。

use std::sync::Arc;

use crate::hub::TaskContext;
use crate::llm::{GenerateOptions, LlmClient};
use crate::prompts::PromptTable;

/// 任务路由器：单次 LLM 调用产出 TaskContext
pub struct TaskRouter {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptTable>,
}

impl TaskRouter {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptTable>) -> Self {
        Self { llm, prompts }
    }

    pub async fn route(&self, question: &str) -> TaskContext {
        let question = question.trim();
        if question.is_empty() {
            return TaskContext::default();
        }

        let system = self.prompts.raw("router_system");
        let user = self.prompts.render("router_user", &[("question", question)]);
        let prompt = format!("{}\n\n{}", system, user);

        let opts = GenerateOptions {
            temperature: 0.0,
            max_tokens: 512,
            ..Default::default()
        };
        let response = match self.llm.generate(&prompt, &opts).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "task router llm call failed, using default ctx");
                return TaskContext::default();
            }
        };

        parse_task_context(&response)
    }
}

/// 从 LLM 输出中提取 JSON 并解析为 TaskContext；失败返回默认值
pub fn parse_task_context(text: &str) -> TaskContext {
    let Some(json_str) = extract_json_object(text) else {
        tracing::debug!("task router: no JSON object in response");
        return TaskContext::default();
    };
    match serde_json::from_str::<TaskContext>(&json_str) {
        Ok(mut ctx) => {
            ctx.capability_tags = ctx
                .capability_tags
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if ctx.adapt_carriers.is_empty() {
                ctx.adapt_carriers = TaskContext::default().adapt_carriers;
            }
            ctx
        }
        Err(e) => {
            tracing::debug!(error = %e, "task router: JSON parse failed");
            TaskContext::default()
        }
    }
}

/// 取文本中第一个平衡的大括号块
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::AttributeLevel;

    #[test]
    fn test_parse_full_context() {
        let text = r#"好的，判断如下：
{"use_tools": true, "capability_tags": ["Search", "web"], "attribute_tags": {"timeliness": "high", "reliability": "medium", "cost_sensitivity": "low"}, "adapt_carriers": ["tools"]}"#;
        let ctx = parse_task_context(text);
        assert!(ctx.use_tools);
        assert_eq!(ctx.capability_tags, vec!["search", "web"]);
        assert_eq!(ctx.attribute_tags.timeliness, AttributeLevel::High);
        assert_eq!(ctx.adapt_carriers, vec!["tools"]);
    }

    #[test]
    fn test_parse_no_tools() {
        let ctx = parse_task_context(r#"{"use_tools": false, "capability_tags": []}"#);
        assert!(!ctx.use_tools);
        assert!(ctx.capability_tags.is_empty());
        // 未给载体时补默认
        assert_eq!(ctx.adapt_carriers.len(), 3);
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let ctx = parse_task_context("I cannot answer that");
        assert!(ctx.use_tools);
        assert_eq!(ctx.attribute_tags.reliability, AttributeLevel::Medium);
    }

    #[tokio::test]
    async fn test_route_with_mock_llm() {
        let llm = Arc::new(crate::llm::MockLlm::new(
            r#"{"use_tools": true, "capability_tags": ["calculate"]}"#,
        ));
        let router = TaskRouter::new(llm, Arc::new(PromptTable::builtin()));
        let ctx = router.route("算一下 2+2").await;
        assert_eq!(ctx.capability_tags, vec!["calculate"]);
    }
}
