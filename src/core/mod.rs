//! 核心编排层：编排器与错误类型

pub mod error;
pub mod orchestrator;

pub use error::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, TaskReport};
