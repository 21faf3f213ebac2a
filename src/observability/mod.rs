//! 可观测性：trace 事件与指标
//!
//! TraceContext 按请求记录阶段事件（有界 + 预览截断）；Metrics 做进程级原子计数。

pub mod metrics;
pub mod trace;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use metrics::Metrics;
pub use trace::{TraceContext, TraceEvent};

/// 初始化 tracing 订阅器（info 级 + RUST_LOG 覆盖）
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().expect("valid directive")))
        .with(fmt::layer())
        .init();
}
