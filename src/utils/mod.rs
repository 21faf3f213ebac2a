//! 通用工具：指数退避重试与请求级缓存

pub mod cache;
pub mod retry;

pub use cache::RequestCache;
pub use retry::{retry_with_backoff, BackoffPolicy};
