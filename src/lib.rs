//! Scout - 多智能体调研 Agent 核心
//!
//! 模块划分：
//! - **agents**: 规划 / 执行 / 验证 Agent 与可选任务先验路由
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器（快速路径、历史快照、请求缓存、trace 注入）与错误类型
//! - **hub**: ToolHub（多来源候选注册、任务感知打分、并发竞速、结果综合）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话短期记忆与历史快照
//! - **observability**: TraceContext 事件追踪与指标统计
//! - **prompts**: 进程内提示词表（{placeholder} 替换）
//! - **tools**: 工具契约与内置工具（计算、时间、搜索、对话历史、文件列表）
//! - **workflow**: 规划 -> 执行 -> 验证 -> 合成 的状态机

pub mod agents;
pub mod config;
pub mod core;
pub mod hub;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompts;
pub mod tools;
pub mod utils;
pub mod workflow;
