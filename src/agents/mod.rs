//! 多智能体：规划 / 执行 / 验证 与可选任务路由
//!
//! 各 Agent 职责单一，只依赖 LLM 接口与（执行 Agent 的）ToolHub 句柄；
//! 相互之间不持引用，状态通过 WorkflowState 向上返回。

pub mod execution;
pub mod planning;
pub mod router;
pub mod verification;

pub use execution::ExecutionAgent;
pub use planning::PlanningAgent;
pub use router::TaskRouter;
pub use verification::VerificationAgent;
