//! 工作流引擎：四节点状态机
//!
//! planning -> execution -> [还有步骤?] -> verification -> [还有步骤?] ↺ execution
//!                                       └ 没有 -> synthesis -> END
//!
//! 以直写循环实现与图式编排完全相同的迁移：执行后仅当还有剩余步骤才进入验证节点，
//! 最后一步执行完直接进入合成。步骤严格按 id 升序串行执行，结果按执行顺序追加；
//! 验证只记录发现（置信度 + 问题列表），从不回退或阻断。

use std::sync::Arc;

use crate::agents::{ExecutionAgent, PlanningAgent, VerificationAgent};
use crate::llm::{GenerateOptions, LlmClient};
use crate::prompts::PromptTable;
use crate::workflow::types::{Plan, RunContext, TaskOutcome, WorkflowState};

/// 合成提示词中每步结果的截断长度
const SYNTHESIS_STEP_PREVIEW: usize = 200;

/// 工作流引擎：组合三个 Agent，状态只在节点间单向流动
pub struct WorkflowEngine {
    planning: PlanningAgent,
    execution: ExecutionAgent,
    verification: VerificationAgent,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptTable>,
    /// 合成阶段是否调用 LLM 生成自然语言答案
    llm_synthesis: bool,
    opts: GenerateOptions,
}

impl WorkflowEngine {
    pub fn new(
        planning: PlanningAgent,
        execution: ExecutionAgent,
        verification: VerificationAgent,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptTable>,
        llm_synthesis: bool,
        opts: GenerateOptions,
    ) -> Self {
        Self {
            planning,
            execution,
            verification,
            llm,
            prompts,
            llm_synthesis,
            opts,
        }
    }

    pub async fn run(&self, question: &str, ctx: &RunContext) -> TaskOutcome {
        let mut state = WorkflowState::new(question);

        self.planning_node(&mut state, ctx).await;

        let steps_total = state
            .task_plan
            .as_ref()
            .map(|p| p.steps.len())
            .unwrap_or(0);

        loop {
            if state.current_step >= steps_total {
                break;
            }
            self.execution_node(&mut state, ctx).await;
            if state.current_step < steps_total {
                self.verification_node(&mut state, ctx);
            } else {
                break;
            }
        }

        self.synthesis_node(&mut state, ctx).await
    }

    /// 规划节点：产出计划；空计划用单步直推计划兜底
    async fn planning_node(&self, state: &mut WorkflowState, ctx: &RunContext) {
        ctx.trace.on_planning_start(&state.question);
        let plan = self.planning.decompose(&state.question, ctx).await;
        let plan = if plan.steps.is_empty() {
            Plan::single_step(&state.question)
        } else {
            plan
        };
        ctx.trace.on_planning_end(plan.steps.len(), true, None);
        tracing::info!(steps = plan.steps.len(), "plan ready");
        state.task_plan = Some(plan);
        state.current_step = 0;
    }

    /// 执行节点：取当前步骤执行，结果按序追加；异常已在执行层折叠为失败结果
    async fn execution_node(&self, state: &mut WorkflowState, ctx: &RunContext) {
        let Some(plan) = &state.task_plan else { return };
        let Some(step) = plan.steps.get(state.current_step).cloned() else {
            return;
        };

        ctx.trace
            .on_step_start(step.id, &step.description, &step.tool_type);
        let result = self
            .execution
            .execute_step(&step, &state.step_results, ctx)
            .await;
        ctx.trace.on_step_end(
            step.id,
            result.success,
            result.result.as_deref().unwrap_or(""),
            result.error.as_deref(),
            &result.method,
        );
        if let Some(error) = &result.error {
            state.errors.push(format!("步骤 {}: {}", step.id, error));
        }
        state.step_results.push(result);
        state.current_step += 1;
    }

    /// 验证节点：校验最新一步，只追加发现
    fn verification_node(&self, state: &mut WorkflowState, ctx: &RunContext) {
        let Some(last) = state.step_results.last() else {
            return;
        };
        let Some(step) = state
            .task_plan
            .as_ref()
            .and_then(|p| p.steps.iter().find(|s| s.id == last.step_id))
        else {
            return;
        };

        ctx.trace.on_verification_start(last.step_id);
        let prior = &state.step_results[..state.step_results.len() - 1];
        let verification = self.verification.verify(step, last, prior);
        ctx.trace.on_verification_end(
            verification.step_id,
            verification.verified,
            verification.confidence,
        );
        if !verification.verified || verification.confidence < 0.5 {
            state.errors.push(format!(
                "步骤 {} 验证存疑: {:?}",
                verification.step_id, verification.issues
            ));
        }
        state.verifications.push(verification);
    }

    /// 合成节点：从后往前取第一个成功且非空的结果；可选 LLM 综合
    async fn synthesis_node(&self, state: &mut WorkflowState, ctx: &RunContext) -> TaskOutcome {
        ctx.trace.on_synthesis_start(state.step_results.len());

        let successes: Vec<_> = state.step_results.iter().filter(|r| r.success).collect();
        let fallback = self.prompts.raw("synthesis_fallback_no_answer").to_string();

        if successes.is_empty() {
            ctx.trace.on_synthesis_end(false, &fallback, None);
            state.final_answer = Some(fallback.clone());
            return TaskOutcome {
                success: false,
                answer: fallback,
                confidence: 0.0,
                reasoning: format_reasoning(state),
                errors: state.errors.clone(),
            };
        }

        let mut answer = None;
        if self.llm_synthesis {
            answer = self.synthesize_with_llm(state, &successes).await;
        }
        let answer = answer.unwrap_or_else(|| {
            successes
                .iter()
                .rev()
                .filter_map(|r| r.result.as_deref())
                .map(str::trim)
                .find(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or(fallback)
        });

        ctx.trace.on_synthesis_end(true, &answer, None);
        state.final_answer = Some(answer.clone());

        TaskOutcome {
            success: true,
            answer,
            confidence: overall_confidence(state),
            reasoning: format_reasoning(state),
            errors: state.errors.clone(),
        }
    }

    async fn synthesize_with_llm(
        &self,
        state: &WorkflowState,
        successes: &[&crate::workflow::types::StepResult],
    ) -> Option<String> {
        let context = successes
            .iter()
            .filter_map(|r| {
                r.result.as_ref().map(|v| {
                    let preview: String = v.chars().take(SYNTHESIS_STEP_PREVIEW).collect();
                    format!("步骤{}: {}", r.step_id, preview)
                })
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = self.prompts.render(
            "synthesis_evidence",
            &[("context", context.as_str()), ("question", &state.question)],
        );
        match self.llm.generate(&prompt, &self.opts).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "llm synthesis failed, using last success result");
                None
            }
        }
    }
}

/// 整体置信度：验证置信度的均值
fn overall_confidence(state: &WorkflowState) -> f64 {
    if state.verifications.is_empty() {
        return 0.0;
    }
    state.verifications.iter().map(|v| v.confidence).sum::<f64>()
        / state.verifications.len() as f64
}

/// 推理过程摘要：问题、计划规模、各步方法
fn format_reasoning(state: &WorkflowState) -> String {
    let mut lines = vec![format!("问题: {}", state.question)];
    if let Some(plan) = &state.task_plan {
        lines.push(format!("计划: {} 个步骤", plan.steps.len()));
    }
    for result in &state.step_results {
        lines.push(format!("步骤 {}: {}", result.step_id, result.method));
    }
    lines.join("\n")
}
