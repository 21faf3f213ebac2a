//! 工作流类型定义
//!
//! 计划 / 步骤 / 步骤结果 / 工作流状态。计划一经放入状态即视为不可变；
//! 状态只由工作流节点追加修改。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::hub::{TaskContext, ToolResult};
use crate::observability::TraceContext;

/// tool_type 为 "none" 表示直接推理
pub const TOOL_TYPE_NONE: &str = "none";

/// 计划中的单个步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: u32,
    pub description: String,
    #[serde(default = "default_tool_type")]
    pub tool_type: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<u32>,
}

fn default_tool_type() -> String {
    TOOL_TYPE_NONE.to_string()
}

/// 步骤种类：直接推理或工具调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind<'a> {
    DirectReasoning,
    ToolInvocation(&'a str),
}

impl Step {
    pub fn kind(&self) -> StepKind<'_> {
        if self.tool_type == TOOL_TYPE_NONE || self.tool_type.is_empty() {
            StepKind::DirectReasoning
        } else {
            StepKind::ToolInvocation(&self.tool_type)
        }
    }
}

/// 任务计划；不变式：步骤 id 从 1 连续递增，依赖只指向更小的 id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<Step>,
    /// 源计划声明但不并行执行（执行始终按 id 升序串行）
    #[serde(default)]
    pub parallel_groups: Vec<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_estimated_time: Option<u32>,
}

impl Plan {
    /// 单步直推计划：规划失败 / 空计划时的兜底
    pub fn single_step(question: &str) -> Self {
        Self {
            steps: vec![Step {
                id: 1,
                description: question.to_string(),
                tool_type: TOOL_TYPE_NONE.to_string(),
                dependencies: Vec::new(),
                complexity: None,
                estimated_time: None,
            }],
            parallel_groups: Vec::new(),
            total_estimated_time: None,
        }
    }
}

/// 单步执行结果；每执行一步按序追加一条
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 工具路径的原始结果（综合标记、来源列表等）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<ToolResult>,
}

impl StepResult {
    pub fn failed(step_id: u32, method: &str, error: impl Into<String>) -> Self {
        Self {
            step_id,
            success: false,
            result: None,
            method: method.to_string(),
            error: Some(error.into()),
            raw: None,
        }
    }
}

/// 验证发现：只记录，不阻断
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub step_id: u32,
    pub verified: bool,
    pub confidence: f64,
    pub consistency_check: bool,
    pub logic_check: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// 工作流状态：各节点读取既有状态并追加
#[derive(Debug, Default)]
pub struct WorkflowState {
    pub question: String,
    pub task_plan: Option<Plan>,
    pub current_step: usize,
    pub step_results: Vec<StepResult>,
    pub final_answer: Option<String>,
    pub errors: Vec<String>,
    pub verifications: Vec<Verification>,
}

impl WorkflowState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// 单请求运行上下文：trace 句柄、路由产出、根取消域
#[derive(Clone)]
pub struct RunContext {
    pub trace: Arc<TraceContext>,
    pub task_ctx: Option<TaskContext>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(trace: Arc<TraceContext>) -> Self {
        Self {
            trace,
            task_ctx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_task_ctx(mut self, task_ctx: Option<TaskContext>) -> Self {
        self.task_ctx = task_ctx;
        self
    }
}

/// 工作流输出
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub answer: String,
    pub confidence: f64,
    pub reasoning: String,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind() {
        let step = Step {
            id: 1,
            description: "想一想".into(),
            tool_type: "none".into(),
            dependencies: vec![],
            complexity: None,
            estimated_time: None,
        };
        assert_eq!(step.kind(), StepKind::DirectReasoning);

        let step = Step {
            tool_type: "calculate".into(),
            ..step
        };
        assert_eq!(step.kind(), StepKind::ToolInvocation("calculate"));
    }

    #[test]
    fn test_plan_deserialize_with_defaults() {
        let plan: Plan = serde_json::from_str(
            r#"{"steps": [{"id": 1, "description": "搜索资料"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_type, "none");
        assert!(plan.steps[0].dependencies.is_empty());
    }

    #[test]
    fn test_single_step_plan() {
        let plan = Plan::single_step("什么是 Rust?");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, 1);
        assert_eq!(plan.steps[0].kind(), StepKind::DirectReasoning);
    }
}
