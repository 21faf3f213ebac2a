//! 编排器：请求主入口
//!
//! process_task 流程：快速路径（问候 / 能力自述 / 历史元问题）-> 历史快照 + 追加用户消息
//! -> 请求级缓存 -> trace 注入 -> 可选任务路由 -> 工作流执行（带总超时）-> 收尾
//! （追加助手消息、清快照、写缓存、附带 trace）。任何失败路径都会清掉快照并返回
//! 结构化失败，进程不崩。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::agents::{ExecutionAgent, PlanningAgent, TaskRouter, VerificationAgent};
use crate::config::AppConfig;
use crate::core::error::AgentError;
use crate::hub::{TaskContext, ToolCandidate, ToolHub, ToolSource};
use crate::llm::{GenerateOptions, LlmClient};
use crate::memory::{ConversationEntry, ConversationMemory, Role};
use crate::observability::{Metrics, TraceContext};
use crate::prompts::PromptTable;
use crate::tools::{
    CalculatorTool, ClockTool, ConversationHistoryTool, WebSearchTool, WorkspaceFilesTool,
};
use crate::utils::{BackoffPolicy, RequestCache};
use crate::workflow::{RunContext, WorkflowEngine};

/// 问题长度上限（去空白后）
const MAX_QUESTION_LEN: usize = 5000;
/// 英文问候走快速路径的长度上限
const GREETING_MAX_LEN: usize = 16;

/// 问候快速路径的固定回复
const GREETING_ANSWER: &str = "你好，我是面向科研辅助和商业调研场景的多智能体调研助手，\
可以帮你分解复杂问题、调用搜索/计算/时间/会话历史等工具，并生成结构化的分析和回答。\
你可以直接用自然语言告诉我你的需求。";

/// 中文问候词（子串匹配）
const CN_GREETINGS: &[&str] = &["你好", "嗨", "早上好", "下午好", "晚上好"];

/// 能力自述关键词
const CAPABILITY_KEYWORDS: &[&str] = &[
    "你都能干什么",
    "你会什么",
    "你能做什么",
    "你有什么能力",
    "what can you do",
    "what are you capable of",
    "what are your capabilities",
];

/// 历史元问题关键词（中文）
const HISTORY_KEYWORDS_CN: &[&str] = &[
    "上一个问题",
    "上一个问",
    "刚刚问了你什么",
    "刚才问了你什么",
    "一共问了你几个问题",
    "都问了你什么",
];

/// 历史元问题关键词（英文）
const HISTORY_KEYWORDS_EN: &[&str] = &[
    "what did i ask",
    "what did i just ask",
    "what did i say",
    "last question",
    "my last question",
    "previous question",
    "what i asked",
    "what i just asked",
];

/// 强依赖当前时刻 / 对话历史的问题不进缓存
const CACHE_SKIP_KEYWORDS: &[&str] = &[
    "几点", "现在时间", "当前时间", "utc", "timezone", "时区", "日期", "今天", "明天", "昨天",
    "刚刚", "刚才", "之前", "上一个", "上一条", "对话历史", "你刚刚", "我刚刚", "我们刚才",
    "what time", "current time", "now", "today", "time", "just", "previous", "last message",
    "conversation history", "what did i ask", "last question", "previous question",
];

/// 请求处理结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub success: bool,
    pub answer: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<serde_json::Value>,
    /// 错误类别（HTTP 层做状态码映射用），不序列化进响应体
    #[serde(skip_serializing)]
    pub error_kind: Option<&'static str>,
}

impl TaskReport {
    fn ok(answer: String, confidence: f64, reasoning: String) -> Self {
        Self {
            success: true,
            answer,
            confidence,
            reasoning,
            errors: Vec::new(),
            trace: None,
            error_kind: None,
        }
    }

    fn failed(error: &AgentError, answer: String) -> Self {
        Self {
            success: false,
            answer,
            confidence: 0.0,
            reasoning: String::new(),
            errors: vec![error.to_string()],
            trace: None,
            error_kind: Some(error.kind()),
        }
    }
}

/// 编排器构建：默认注册内置工具，可叠加自定义候选（skills / mcps 来源由装载边界决定）
pub struct OrchestratorBuilder {
    cfg: AppConfig,
    llm: Arc<dyn LlmClient>,
    extra_candidates: Vec<ToolCandidate>,
    default_tools: bool,
}

impl OrchestratorBuilder {
    pub fn new(cfg: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            cfg,
            llm,
            extra_candidates: Vec::new(),
            default_tools: true,
        }
    }

    pub fn register_candidate(mut self, candidate: ToolCandidate) -> Self {
        self.extra_candidates.push(candidate);
        self
    }

    /// 不注册内置工具（测试用，自己全量控制候选）
    pub fn without_default_tools(mut self) -> Self {
        self.default_tools = false;
        self
    }

    pub fn build(self) -> Orchestrator {
        let cfg = self.cfg;
        let llm = self.llm;
        let metrics = Arc::new(Metrics::new());
        let prompts = Arc::new(PromptTable::builtin());
        let memory = Arc::new(Mutex::new(ConversationMemory::new(
            cfg.memory.short_term_size,
        )));

        let mut hub = ToolHub::new(
            Duration::from_secs(cfg.tools.timeout_secs),
            metrics.clone(),
        )
        .with_llm(llm.clone())
        .with_prompts(prompts.clone());

        if self.default_tools {
            hub.register(ToolCandidate::from_tool(
                Arc::new(WebSearchTool::default()),
                ToolSource::Tools,
            ));
            hub.register(ToolCandidate::from_tool(
                Arc::new(CalculatorTool),
                ToolSource::Tools,
            ));
            hub.register(ToolCandidate::from_tool(
                Arc::new(ClockTool),
                ToolSource::Tools,
            ));
            hub.register(ToolCandidate::from_tool(
                Arc::new(ConversationHistoryTool::new(memory.clone())),
                ToolSource::Tools,
            ));
            let workspace_root = cfg
                .tools
                .workspace_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            hub.register(ToolCandidate::from_tool(
                Arc::new(WorkspaceFilesTool::new(workspace_root)),
                ToolSource::Tools,
            ));
        }
        for candidate in self.extra_candidates {
            hub.register(candidate);
        }
        let hub = Arc::new(hub);

        let llm_opts = GenerateOptions {
            temperature: cfg.llm.temperature,
            max_tokens: cfg.llm.max_tokens,
            timeout: Duration::from_secs(cfg.llm.timeout_secs),
        };

        let mut planning =
            PlanningAgent::new(llm.clone(), prompts.clone(), metrics.clone(), llm_opts.clone());
        planning.set_available_tools(hub.tool_descriptions());
        let execution = ExecutionAgent::new(
            llm.clone(),
            hub.clone(),
            prompts.clone(),
            metrics.clone(),
            BackoffPolicy::default().with_max_retries(cfg.tools.max_retries),
            llm_opts.clone(),
        );
        let engine = WorkflowEngine::new(
            planning,
            execution,
            VerificationAgent::new(),
            llm.clone(),
            prompts.clone(),
            cfg.task.llm_synthesis,
            llm_opts.clone(),
        );

        let router = cfg
            .tools
            .use_task_router
            .then(|| TaskRouter::new(llm.clone(), prompts.clone()));

        let cache = RequestCache::new(Duration::from_secs(cfg.performance.cache_ttl), 1000);

        Orchestrator {
            cfg,
            llm,
            llm_opts,
            hub,
            memory,
            cache,
            metrics,
            prompts,
            engine,
            router,
        }
    }
}

/// 编排器：持有全部进程级服务，依赖只向内传递
pub struct Orchestrator {
    cfg: AppConfig,
    llm: Arc<dyn LlmClient>,
    llm_opts: GenerateOptions,
    hub: Arc<ToolHub>,
    memory: Arc<Mutex<ConversationMemory>>,
    cache: RequestCache<TaskReport>,
    metrics: Arc<Metrics>,
    prompts: Arc<PromptTable>,
    engine: WorkflowEngine,
    router: Option<TaskRouter>,
}

impl Orchestrator {
    pub fn new(cfg: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        OrchestratorBuilder::new(cfg, llm).build()
    }

    pub fn builder(cfg: AppConfig, llm: Arc<dyn LlmClient>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg, llm)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn hub(&self) -> &ToolHub {
        &self.hub
    }

    /// 请求主入口
    pub async fn process_task(
        &self,
        question: &str,
        context: Option<serde_json::Value>,
    ) -> TaskReport {
        let question = question.trim();
        if question.is_empty() {
            let e = AgentError::Input("question is empty".into());
            self.metrics.record_error(e.kind());
            self.metrics.requests.record(false);
            return TaskReport::failed(&e, "问题不能为空".into());
        }
        if question.chars().count() > MAX_QUESTION_LEN {
            let e = AgentError::Input(format!("question exceeds {} chars", MAX_QUESTION_LEN));
            self.metrics.record_error(e.kind());
            self.metrics.requests.record(false);
            return TaskReport::failed(&e, format!("问题长度不能超过 {} 字符", MAX_QUESTION_LEN));
        }
        tracing::info!(question = %preview(question, 100), "processing task");

        // 1. 快速路径：命中则不走规划执行链路，也不建快照
        if let Some(report) = self.maybe_fast_path(question) {
            self.metrics
                .requests
                .fast_path_hits
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.append_user(question, context.clone());
            if report.success {
                self.append_assistant(&report);
            }
            self.metrics.requests.record(report.success);
            return report;
        }

        // 2. 快照 + 追加当前用户消息
        {
            let mut memory = self.memory.lock().expect("memory lock poisoned");
            memory.create_snapshot();
        }
        self.append_user(question, context);

        let fingerprint = question.to_lowercase();
        let cache_eligible = self.cfg.performance.cache_enabled && !is_time_sensitive(&fingerprint);

        // 3. 请求级缓存
        if cache_eligible {
            if let Some(mut cached) = self.cache.get(&fingerprint) {
                tracing::info!("request cache hit");
                self.metrics
                    .requests
                    .cache_hits
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                cached.trace = None;
                self.append_assistant(&cached);
                self.clear_snapshot();
                self.metrics.requests.record(cached.success);
                return cached;
            }
        }

        // 4. trace 注入
        let trace = Arc::new(if self.cfg.observability.enabled {
            TraceContext::new(
                self.cfg.observability.max_events,
                self.cfg.observability.max_preview,
            )
        } else {
            TraceContext::disabled()
        });

        // 5. 可选任务路由
        let mut task_ctx: Option<TaskContext> = None;
        if let Some(router) = &self.router {
            let routed = router.route(question).await;
            if !routed.use_tools {
                let report = self.answer_without_tools(question).await;
                if report.success {
                    self.append_assistant(&report);
                }
                self.clear_snapshot();
                self.metrics.requests.record(report.success);
                return report;
            }
            task_ctx = Some(routed);
        }

        let ctx = RunContext::new(trace.clone()).with_task_ctx(task_ctx);

        // 6. 工作流执行（带总超时；超时取消根作用域，挂起的工具任务随之中止）
        let deadline = Duration::from_secs(self.cfg.task.timeout_secs);
        let outcome = match tokio::time::timeout(deadline, self.engine.run(question, &ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                ctx.cancel.cancel();
                let e = AgentError::DeadlineExceeded;
                self.metrics.record_error(e.kind());
                self.clear_snapshot();
                self.metrics.requests.record(false);
                let mut report = TaskReport::failed(&e, "timeout".into());
                if self.cfg.observability.enabled && self.cfg.observability.include_in_response {
                    report.trace = Some(trace.to_json());
                }
                return report;
            }
        };

        // 7. 收尾
        let mut report = TaskReport {
            success: outcome.success,
            answer: outcome.answer,
            confidence: outcome.confidence,
            reasoning: outcome.reasoning,
            errors: outcome.errors,
            trace: None,
            error_kind: (!outcome.success).then_some("internal"),
        };
        if report.success {
            self.append_assistant(&report);
            if cache_eligible {
                self.cache.set(fingerprint, report.clone());
            }
        }
        self.clear_snapshot();
        if self.cfg.observability.enabled && self.cfg.observability.include_in_response {
            report.trace = Some(trace.to_json());
        }
        self.metrics.requests.record(report.success);
        report
    }

    // ---------------- 快速路径 ----------------

    fn maybe_fast_path(&self, question: &str) -> Option<TaskReport> {
        let lower = question.to_lowercase();

        if is_simple_greeting(question, &lower) {
            return Some(TaskReport::ok(
                GREETING_ANSWER.to_string(),
                0.9,
                "快速路径：问候场景，直接用系统自我介绍回复。".into(),
            ));
        }

        let capability_hit = CAPABILITY_KEYWORDS
            .iter()
            .any(|k| question.contains(k) || lower.contains(k))
            || (question.contains("能力") && question.contains("你"));
        if capability_hit {
            return Some(TaskReport::ok(
                self.build_capability_answer(),
                0.95,
                "快速路径：能力自述问题，基于真实工具注册表生成自描述。".into(),
            ));
        }

        let history_hit = HISTORY_KEYWORDS_CN.iter().any(|k| question.contains(k))
            || HISTORY_KEYWORDS_EN.iter().any(|k| lower.contains(k));
        if history_hit {
            return Some(TaskReport::ok(
                self.build_history_meta_answer(question, &lower),
                0.95,
                "快速路径：对话历史元问题，直接基于对话记录计算，避免幻觉。".into(),
            ));
        }

        None
    }

    /// 基于 ToolHub 注册表构造能力自述
    fn build_capability_answer(&self) -> String {
        let mut parts = vec![
            "我是一个面向科研辅助与商业调研场景的多智能体系统。".to_string(),
            "内部包含规划、执行、验证三个 Agent，可以对复杂问题进行分解、执行和结果校验。"
                .to_string(),
        ];

        let tools = self.hub.list_tools();
        if !tools.is_empty() {
            parts.push("目前已接入的工具包括：".to_string());
            for (name, sources) in tools {
                parts.push(format!("- `{}`（来源: {}）", name, sources.join(",")));
            }
            parts.push(
                "其中 `search_web` 用于信息检索，`calculate` 用于数学计算，\
`get_time` 获取当前时间，`get_conversation_history` 用于查看对话历史。"
                    .to_string(),
            );
        }

        parts.push(
            "在对话层面，我支持多轮对话记忆，可以理解上下文并在工具失败时友好降级。".to_string(),
        );
        parts.join("\n")
    }

    /// 历史元问题：直接从记忆计算（此时尚未建快照，读实时序列即「处理前」历史）
    fn build_history_meta_answer(&self, question: &str, lower: &str) -> String {
        let history = {
            let memory = self.memory.lock().expect("memory lock poisoned");
            memory.recent(50, false)
        };
        let questions: Vec<String> = history
            .iter()
            .filter(|e| e.role == Role::User)
            .map(|e| e.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .filter(|c| !is_simple_greeting(c, &c.to_lowercase()))
            .collect();

        let is_english = HISTORY_KEYWORDS_EN.iter().any(|k| lower.contains(k))
            || (lower.contains("how many") && lower.contains("question"));

        if questions.is_empty() {
            return if is_english {
                "There are no previous questions in this conversation yet.".to_string()
            } else {
                "目前对话中还没有检测到你之前明确提出的问题。".to_string()
            };
        }

        let last_question = questions.last().expect("non-empty").clone();
        let total = questions.len();
        let mut parts: Vec<String> = Vec::new();

        let asks_last = ["上一个问题", "刚刚问了你什么", "刚才问了你什么"]
            .iter()
            .any(|k| question.contains(k))
            || HISTORY_KEYWORDS_EN.iter().any(|k| lower.contains(k));
        if asks_last {
            if is_english {
                parts.push(format!("Your last question was: {}", last_question));
            } else {
                parts.push(format!("你上一个问题是：{}", last_question));
            }
        }

        let asks_count = question.contains("几个问题")
            || (lower.contains("how many") && lower.contains("question"));
        if asks_count {
            if is_english {
                parts.push(format!(
                    "You have asked {} question(s) so far (excluding simple greetings).",
                    total
                ));
            } else {
                parts.push(format!("你刚才一共问了 {} 个问题（不含简单问候）。", total));
            }
        }

        let asks_list = question.contains("都问了你什么") || question.contains("都问了你哪些");
        if asks_list {
            parts.push(if is_english {
                "Your previous questions:".to_string()
            } else {
                "你之前的问题如下：".to_string()
            });
            for (idx, q) in questions.iter().enumerate() {
                parts.push(format!("{}. {}", idx + 1, q));
            }
        }

        if parts.is_empty() {
            if is_english {
                parts.push(format!("Your last question was: {}", last_question));
            } else {
                parts.push(format!("你上一个问题是：{}", last_question));
                parts.push(format!("你之前一共问了 {} 个问题。", total));
            }
        }

        parts.join("\n")
    }

    /// 路由判定无需工具：单次 LLM 直答
    async fn answer_without_tools(&self, question: &str) -> TaskReport {
        let prompt = self
            .prompts
            .render("synthesis_fallback_direct", &[("question", question)]);
        match self.llm.generate(&prompt, &self.llm_opts).await {
            Ok(text) if !text.trim().is_empty() => TaskReport::ok(
                text.trim().to_string(),
                0.7,
                "任务路由判定无需工具，LLM 直接回答。".into(),
            ),
            Ok(_) => {
                let e = AgentError::Internal("empty llm answer".into());
                self.metrics.record_error(e.kind());
                TaskReport::failed(&e, self.prompts.raw("synthesis_fallback_no_answer").into())
            }
            Err(e) => {
                let e = AgentError::Llm(e);
                self.metrics.record_error(e.kind());
                TaskReport::failed(&e, self.prompts.raw("synthesis_fallback_no_answer").into())
            }
        }
    }

    // ---------------- 记忆收尾 ----------------

    fn append_user(&self, question: &str, context: Option<serde_json::Value>) {
        let mut memory = self.memory.lock().expect("memory lock poisoned");
        let mut entry = ConversationEntry::user(question);
        entry.metadata = context;
        memory.append(entry);
    }

    fn append_assistant(&self, report: &TaskReport) {
        if report.answer.is_empty() {
            return;
        }
        let mut memory = self.memory.lock().expect("memory lock poisoned");
        memory.append(ConversationEntry::assistant(
            report.answer.clone(),
            Some(serde_json::json!({
                "confidence": report.confidence,
                "reasoning": report.reasoning,
            })),
        ));
    }

    fn clear_snapshot(&self) {
        self.memory
            .lock()
            .expect("memory lock poisoned")
            .clear_snapshot();
    }
}

/// 简单问候：中文子串 / 英文整词，且文本足够短
fn is_simple_greeting(text: &str, lower: &str) -> bool {
    if text.chars().count() > GREETING_MAX_LEN {
        return false;
    }
    if CN_GREETINGS.iter().any(|k| text.contains(k)) {
        return true;
    }
    let word_re = Regex::new(r"(?i)\b(hi|hello)\b").expect("valid regex");
    word_re.is_match(lower)
}

/// 是否携带时间 / 历史语义（这类问题不进缓存）
fn is_time_sensitive(lower: &str) -> bool {
    CACHE_SKIP_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_detection_word_boundary() {
        assert!(is_simple_greeting("hi", "hi"));
        assert!(is_simple_greeting("hello there", "hello there"));
        assert!(is_simple_greeting("你好", "你好"));
        // "hi" 出现在 "this" / "history" 内不算问候
        assert!(!is_simple_greeting("this is history", "this is history"));
        // 长文本不算问候
        assert!(!is_simple_greeting(
            "hello, could you summarize the following long passage for me please",
            "hello, could you summarize the following long passage for me please"
        ));
    }

    #[test]
    fn test_time_sensitive_detection() {
        assert!(is_time_sensitive("what time is it"));
        assert!(is_time_sensitive("我刚刚问了什么"));
        assert!(is_time_sensitive("今天的日期"));
        assert!(!is_time_sensitive("什么是 rust 语言"));
    }
}
