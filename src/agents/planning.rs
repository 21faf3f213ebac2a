//! 规划 Agent：问题分解为任务计划
//!
//! 提示词包含当前工具清单（核心工具始终列出，其余最多 10 个 + 剩余数量提示）。
//! LLM 输出按宽容模式解析（剥 markdown 代码块、容忍尾逗号）；解析失败或步骤为空
//! 时退回单步直推计划。合法化规则：id 重排为从 1 连续、依赖只保留指向更小 id 的、
//! 未知 tool_type 改写为 "none" 并记一条警告事件。

use std::sync::Arc;

use regex::Regex;

use crate::llm::{GenerateOptions, LlmClient};
use crate::observability::Metrics;
use crate::prompts::PromptTable;
use crate::workflow::types::{Plan, RunContext, TOOL_TYPE_NONE};

/// 核心工具：提示词里永远列出
const CORE_TOOLS: &[&str] = &[
    TOOL_TYPE_NONE,
    "search_web",
    "calculate",
    "get_time",
    "get_conversation_history",
    "list_workspace_files",
];

/// 非核心工具在提示词中最多展示的数量
const MAX_OTHER_TOOLS: usize = 10;

/// 非核心工具描述在提示词中的截断长度
const DESCRIPTION_PREVIEW: usize = 60;

/// 规划 Agent
pub struct PlanningAgent {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptTable>,
    /// 当前系统可用工具 (name, description)，由编排层在启动时注入
    inventory: Vec<(String, String)>,
    /// 工具名集合（含 "none"），用于 tool_type 合法性校验
    available_tools: Vec<String>,
    metrics: Arc<Metrics>,
    opts: GenerateOptions,
}

impl PlanningAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptTable>,
        metrics: Arc<Metrics>,
        opts: GenerateOptions,
    ) -> Self {
        let mut agent = Self {
            llm,
            prompts,
            inventory: Vec::new(),
            available_tools: Vec::new(),
            metrics,
            opts,
        };
        agent.set_available_tools(
            CORE_TOOLS
                .iter()
                .map(|s| (s.to_string(), String::new()))
                .collect(),
        );
        agent
    }

    /// 注入可用工具清单 (name, description)；自动补上 "none"
    pub fn set_available_tools(&mut self, inventory: Vec<(String, String)>) {
        let mut names: Vec<String> = inventory.iter().map(|(n, _)| n.clone()).collect();
        if !names.iter().any(|n| n == TOOL_TYPE_NONE) {
            names.push(TOOL_TYPE_NONE.to_string());
        }
        names.sort();
        names.dedup();
        self.available_tools = names;
        self.inventory = inventory;
    }

    /// 问题 -> 计划；任何失败路径都产出可执行的计划（最差单步直推）
    pub async fn decompose(&self, question: &str, ctx: &RunContext) -> Plan {
        let prompt = self.build_prompt(question);

        let response = match self.llm.generate(&prompt, &self.opts).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "planning llm call failed, using single-step plan");
                self.metrics
                    .record_error(crate::core::error::AgentError::from(e).kind());
                ctx.trace.on_warning("planning_end", "planning llm failed");
                return Plan::single_step(question);
            }
        };

        let Some(parsed) = parse_plan(&response) else {
            tracing::warn!("plan parse failed, using single-step plan");
            self.metrics.record_error("plan");
            ctx.trace.on_warning("planning_end", "plan parse failed");
            return Plan::single_step(question);
        };

        let plan = self.sanitize(parsed, ctx);
        if plan.steps.is_empty() {
            return Plan::single_step(question);
        }
        plan
    }

    fn build_prompt(&self, question: &str) -> String {
        // 核心工具始终用裸名列出；其余最多 10 个带一句截断描述
        let mut entries: Vec<String> = CORE_TOOLS
            .iter()
            .filter(|t| self.available_tools.iter().any(|n| n == *t))
            .map(|t| t.to_string())
            .collect();

        let others: Vec<&(String, String)> = self
            .inventory
            .iter()
            .filter(|(name, _)| !CORE_TOOLS.contains(&name.as_str()))
            .collect();
        for (name, description) in others.iter().take(MAX_OTHER_TOOLS) {
            let description = description.trim();
            if description.is_empty() {
                entries.push(name.clone());
            } else {
                let preview: String = description.chars().take(DESCRIPTION_PREVIEW).collect();
                entries.push(format!("{}（{}）", name, preview));
            }
        }

        let mut tools_list = entries.join(", ");
        if others.len() > MAX_OTHER_TOOLS {
            tools_list.push_str(&format!(
                "（还有 {} 个其他工具，可通过工具名称直接调用）",
                others.len() - MAX_OTHER_TOOLS
            ));
        }

        self.prompts.render(
            "planning_decomposition",
            &[("question", question), ("tools_list", &tools_list)],
        )
    }

    /// 合法化：id 重排为 1..n、依赖过滤、未知工具改写为 none
    fn sanitize(&self, plan: Plan, ctx: &RunContext) -> Plan {
        let mut id_map = std::collections::HashMap::new();
        let mut steps = Vec::with_capacity(plan.steps.len());

        for (pos, mut step) in plan.steps.into_iter().enumerate() {
            let new_id = (pos + 1) as u32;
            id_map.insert(step.id, new_id);
            step.id = new_id;

            step.dependencies = step
                .dependencies
                .iter()
                .filter_map(|dep| id_map.get(dep).copied())
                .filter(|dep| *dep < new_id)
                .collect();

            if step.tool_type != TOOL_TYPE_NONE && !self.available_tools.contains(&step.tool_type) {
                tracing::warn!(
                    step_id = step.id,
                    tool_type = %step.tool_type,
                    "unknown tool_type rewritten to none"
                );
                ctx.trace.on_warning(
                    "planning_end",
                    &format!("unknown tool_type '{}' rewritten to none", step.tool_type),
                );
                step.tool_type = TOOL_TYPE_NONE.to_string();
            }
            steps.push(step);
        }

        Plan {
            steps,
            parallel_groups: plan.parallel_groups,
            total_estimated_time: plan.total_estimated_time,
        }
    }
}

/// 宽容解析：剥代码块围栏、截取大括号区间、去尾逗号后按 Plan 反序列化
pub fn parse_plan(text: &str) -> Option<Plan> {
    let trimmed = text.trim();

    let body = if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        }
    } else {
        trimmed
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let mut json_str = body[start..=end].to_string();

    // 容忍尾逗号：",}" / ",]"
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("valid regex");
    json_str = trailing_comma.replace_all(&json_str, "$1").to_string();

    let plan: Plan = serde_json::from_str(&json_str).ok()?;
    if plan.steps.is_empty() {
        return None;
    }
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TraceContext;
    use crate::workflow::types::RunContext;

    fn ctx() -> RunContext {
        RunContext::new(Arc::new(TraceContext::disabled()))
    }

    fn agent_with(reply: &str) -> PlanningAgent {
        PlanningAgent::new(
            Arc::new(crate::llm::MockLlm::new(reply)),
            Arc::new(PromptTable::builtin()),
            Arc::new(Metrics::new()),
            GenerateOptions::default(),
        )
    }

    #[test]
    fn test_parse_plan_with_fences_and_trailing_comma() {
        let text = r#"好的：
```json
{"steps": [{"id": 1, "description": "搜索", "tool_type": "search_web", "dependencies": [],}],}
```"#;
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_type, "search_web");
    }

    #[test]
    fn test_parse_plan_rejects_empty_steps() {
        assert!(parse_plan(r#"{"steps": []}"#).is_none());
        assert!(parse_plan("not json at all").is_none());
    }

    #[tokio::test]
    async fn test_decompose_happy_path() {
        let reply = r#"{"steps": [
            {"id": 1, "description": "计算 2+3*4", "tool_type": "calculate", "dependencies": []},
            {"id": 2, "description": "总结 {step_1_result}", "tool_type": "none", "dependencies": [1]}
        ]}"#;
        let agent = agent_with(reply);
        let plan = agent.decompose("计算并总结", &ctx()).await;
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].dependencies, vec![1]);
    }

    #[tokio::test]
    async fn test_decompose_falls_back_on_garbage() {
        let agent = agent_with("抱歉，我不知道");
        let plan = agent.decompose("什么是 Rust?", &ctx()).await;
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_type, "none");
        assert_eq!(plan.steps[0].description, "什么是 Rust?");
    }

    #[tokio::test]
    async fn test_unknown_tool_rewritten_to_none() {
        let reply = r#"{"steps": [{"id": 1, "description": "查天气", "tool_type": "weather_magic", "dependencies": []}]}"#;
        let agent = agent_with(reply);
        let plan = agent.decompose("明天天气", &ctx()).await;
        assert_eq!(plan.steps[0].tool_type, "none");
    }

    #[tokio::test]
    async fn test_sparse_ids_renumbered_dense() {
        let reply = r#"{"steps": [
            {"id": 3, "description": "a", "tool_type": "none", "dependencies": []},
            {"id": 7, "description": "b", "tool_type": "none", "dependencies": [3]}
        ]}"#;
        let agent = agent_with(reply);
        let plan = agent.decompose("q", &ctx()).await;
        assert_eq!(plan.steps[0].id, 1);
        assert_eq!(plan.steps[1].id, 2);
        assert_eq!(plan.steps[1].dependencies, vec![1]);
    }

    #[tokio::test]
    async fn test_forward_dependency_dropped() {
        let reply = r#"{"steps": [
            {"id": 1, "description": "a", "tool_type": "none", "dependencies": [2]},
            {"id": 2, "description": "b", "tool_type": "none", "dependencies": []}
        ]}"#;
        let agent = agent_with(reply);
        let plan = agent.decompose("q", &ctx()).await;
        assert!(plan.steps[0].dependencies.is_empty());
    }

    #[test]
    fn test_prompt_truncates_tool_list() {
        let mut agent = agent_with("{}");
        let mut inventory: Vec<(String, String)> = CORE_TOOLS
            .iter()
            .map(|s| (s.to_string(), String::new()))
            .collect();
        for i in 0..15 {
            inventory.push((format!("extra_tool_{:02}", i), format!("第 {} 个扩展工具", i)));
        }
        agent.set_available_tools(inventory);
        let prompt = agent.build_prompt("q");
        assert!(prompt.contains("还有 5 个其他工具"));
        assert!(prompt.contains("extra_tool_00（第 0 个扩展工具）"));
        assert!(!prompt.contains("extra_tool_12"));
    }
}
