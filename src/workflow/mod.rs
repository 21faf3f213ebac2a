//! 工作流：规划 -> 执行 -> 验证 -> 合成

pub mod engine;
pub mod types;

pub use engine::WorkflowEngine;
pub use types::{
    Plan, RunContext, Step, StepKind, StepResult, TaskOutcome, Verification, WorkflowState,
};
