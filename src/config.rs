//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，
//! 如 `SCOUT__TOOLS__TIMEOUT_SECS=20`）。所有段均有默认值，零配置可启动（Mock LLM）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub task: TaskSection,
    pub performance: PerformanceSection,
    pub observability: ObservabilitySection,
    pub memory: MemorySection,
    pub web: WebSection,
}

/// [llm] 段：OpenAI 兼容端点与采样参数（API Key 走环境变量 SCOUT_API_KEY / OPENAI_API_KEY）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 单次 LLM 请求超时（秒）
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// [tools] 段：单次工具调用超时、重试上限、是否启用任务先验路由
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次候选调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// 工具调用失败重试上限
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 是否在规划前先做一次任务路由（use_tools / 能力标签 / 属性标签）
    #[serde(default)]
    pub use_task_router: bool,
    /// 文件列表工具的沙箱根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            max_retries: default_max_retries(),
            use_task_router: false,
            workspace_root: None,
        }
    }
}

/// [task] 段：单请求总超时与合成策略
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSection {
    /// 单请求总超时（秒），超时返回 DeadlineExceeded
    #[serde(default = "default_task_timeout_secs")]
    pub timeout_secs: u64,
    /// 合成阶段是否调用 LLM 生成自然语言答案（false 时取最后一个成功步骤结果）
    #[serde(default)]
    pub llm_synthesis: bool,
}

fn default_task_timeout_secs() -> u64 {
    300
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_task_timeout_secs(),
            llm_synthesis: false,
        }
    }
}

/// [performance] 段：请求级缓存
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceSection {
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// 缓存条目过期时间（秒）
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            cache_enabled: default_cache_enabled(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

/// [observability] 段：trace 事件上限、预览截断、是否随响应返回
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_preview")]
    pub max_preview: usize,
    #[serde(default = "default_include_in_response")]
    pub include_in_response: bool,
}

fn default_max_events() -> usize {
    200
}

fn default_max_preview() -> usize {
    500
}

fn default_include_in_response() -> bool {
    true
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_events: default_max_events(),
            max_preview: default_max_preview(),
            include_in_response: default_include_in_response(),
        }
    }
}

/// [memory] 段：短期记忆容量（条）
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_short_term_size")]
    pub short_term_size: usize,
}

fn default_short_term_size() -> usize {
    100
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            short_term_size: default_short_term_size(),
        }
    }
}

/// [web] 段：scout-web 服务端口
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_port() -> u16 {
    8080
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: default_web_port(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tools.timeout_secs, 10);
        assert_eq!(cfg.tools.max_retries, 2);
        assert!(!cfg.tools.use_task_router);
        assert_eq!(cfg.task.timeout_secs, 300);
        assert!(cfg.performance.cache_enabled);
        assert_eq!(cfg.performance.cache_ttl, 3600);
        assert!(!cfg.observability.enabled);
        assert_eq!(cfg.observability.max_events, 200);
        assert_eq!(cfg.memory.short_term_size, 100);
        assert_eq!(cfg.web.port, 8080);
    }
}
