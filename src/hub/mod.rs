//! ToolHub：多来源工具候选的统一执行入口
//!
//! 职责：
//! - 注册：按名称与能力标签双索引，注册完成后索引不可变
//! - 排序：任务上下文感知打分（见 scoring），最近成功候选优先
//! - 竞速：同名多候选最多 3 路并发，先到先胜，败者取消并等待退出
//! - 综合：搜索 / 提取类多候选结果用 LLM 综合，超长或超量时降级为简单合并
//! - 兜底：并发批次全败后对剩余候选按序重试
//!
//! 唯一的可变共享状态是 last_success 索引，由一把互斥锁保护，且只在
//! 常数时间的写入期间持有，绝不跨工具调用持锁。

pub mod candidate;
pub mod scoring;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::llm::{GenerateOptions, LlmClient};
use crate::observability::Metrics;
use crate::prompts::PromptTable;

pub use candidate::{extract_capabilities, ToolCandidate, ToolSource};
pub use scoring::{
    order_candidates, score_result, should_synthesize, AttributeLevel, AttributeTags, TaskContext,
};

/// 竞速批次上限
const MAX_PARALLEL: usize = 3;
/// LLM 综合调用超时
const SYNTHESIS_LLM_TIMEOUT: Duration = Duration::from_secs(10);
/// 综合时的总长度阈值，超过则直接简单合并
const SYNTHESIS_TOTAL_BUDGET: usize = 2000;
/// 简单合并时每个结果的截断长度
const MERGE_PER_RESULT: usize = 300;

/// 工具执行结果附加信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolResultMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub synthesized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_method: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// 工具执行结果：统一结构，失败也不抛异常
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: ToolResultMeta,
}

impl ToolResult {
    pub fn ok(value: Value, source: ToolSource) -> Self {
        Self {
            success: true,
            result: Some(value),
            error: None,
            meta: ToolResultMeta {
                source: Some(source.as_str().to_string()),
                ..Default::default()
            },
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            meta: ToolResultMeta::default(),
        }
    }

    /// 结果的文本形态（字符串直取，其余 JSON 序列化）
    pub fn text(&self) -> String {
        match &self.result {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// 工具中枢：名称索引 + 能力索引 + 最近成功记录
pub struct ToolHub {
    by_name: HashMap<String, Vec<Arc<ToolCandidate>>>,
    by_capability: HashMap<String, Vec<Arc<ToolCandidate>>>,
    /// key 为工具名或 "cap:<capability>"，值为候选下标；锁只护这张表
    last_success: Mutex<HashMap<String, usize>>,
    tool_timeout: Duration,
    llm: Option<Arc<dyn LlmClient>>,
    prompts: Arc<PromptTable>,
    metrics: Arc<Metrics>,
}

impl ToolHub {
    pub fn new(tool_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            by_name: HashMap::new(),
            by_capability: HashMap::new(),
            last_success: Mutex::new(HashMap::new()),
            tool_timeout,
            llm: None,
            prompts: Arc::new(PromptTable::builtin()),
            metrics,
        }
    }

    /// 配置综合答案用的 LLM（不配置时综合一律走简单合并）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptTable>) -> Self {
        self.prompts = prompts;
        self
    }

    /// 注册候选：写入名称索引（按 priority 稳定排序）与能力索引
    pub fn register(&mut self, candidate: ToolCandidate) {
        let candidate = Arc::new(candidate);
        tracing::info!(
            tool = %candidate.name,
            source = candidate.source.as_str(),
            "toolhub registered"
        );
        let arr = self.by_name.entry(candidate.name.clone()).or_default();
        arr.push(candidate.clone());
        arr.sort_by_key(|c| c.priority);

        for cap in &candidate.capabilities {
            let cap = cap.trim().to_lowercase();
            if cap.is_empty() {
                continue;
            }
            self.by_capability.entry(cap).or_default().push(candidate.clone());
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.by_name.get(name).map_or(false, |v| !v.is_empty())
    }

    /// (name, description) 列表，供规划提示词使用；按名称排序保证稳定
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .by_name
            .iter()
            .map(|(name, cands)| (name.clone(), cands[0].description.clone()))
            .collect();
        out.sort();
        out
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// name -> 各候选来源，供能力自描述快速路径使用
    pub fn list_tools(&self) -> Vec<(String, Vec<&'static str>)> {
        let mut out: Vec<(String, Vec<&'static str>)> = self
            .by_name
            .iter()
            .map(|(name, cands)| {
                let mut sources: Vec<&'static str> =
                    cands.iter().map(|c| c.source.as_str()).collect();
                sources.sort();
                sources.dedup();
                (name.clone(), sources)
            })
            .collect();
        out.sort();
        out
    }

    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self.by_capability.keys().cloned().collect();
        caps.sort();
        caps
    }

    fn find_by_capability(&self, capability: &str) -> Vec<Arc<ToolCandidate>> {
        let cap = capability.trim().to_lowercase();
        let mut seen = std::collections::HashSet::new();
        self.by_capability
            .get(&cap)
            .map(|cands| {
                cands
                    .iter()
                    .filter(|c| seen.insert((c.name.clone(), c.source)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn last_success_for(&self, key: &str) -> Option<usize> {
        self.last_success
            .lock()
            .expect("last_success lock poisoned")
            .get(key)
            .copied()
    }

    fn record_success(&self, key: &str, idx: usize) {
        self.last_success
            .lock()
            .expect("last_success lock poisoned")
            .insert(key.to_string(), idx);
    }

    /// 调用单个候选：加超时、记指标、打审计日志；超时的底层任务由竞速层取消
    async fn invoke(
        cand: Arc<ToolCandidate>,
        input: Value,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> ToolResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, cand.tool.execute(input)).await;
        let duration = start.elapsed();

        let result = match outcome {
            Ok(Ok(value)) => ToolResult::ok(value, cand.source),
            Ok(Err(e)) => {
                let mut r = ToolResult::failure(e);
                r.meta.source = Some(cand.source.as_str().to_string());
                r
            }
            Err(_) => {
                metrics.tools.timeouts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let mut r =
                    ToolResult::failure(format!("tool_timeout_after_{}s", timeout.as_secs()));
                r.meta.source = Some(cand.source.as_str().to_string());
                r
            }
        };

        metrics.tools.record_execution(result.success, duration);
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": cand.name,
            "source": cand.source.as_str(),
            "ok": result.success,
            "duration_ms": duration.as_millis() as u64,
        });
        tracing::info!(audit = %audit, "toolhub");
        result
    }

    /// 按名称执行；多候选时依策略竞速或综合
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        task_ctx: Option<&TaskContext>,
    ) -> ToolResult {
        let Some(cands) = self.by_name.get(name).filter(|v| !v.is_empty()) else {
            return ToolResult::failure(format!("tool_not_found: {}", name));
        };
        self.dispatch(name, cands, input, task_ctx, should_synthesize(name, None, cands.len()))
            .await
    }

    /// 按能力标签执行；能力未知时返回带建议的结构化错误
    pub async fn execute_by_capability(
        &self,
        capability: &str,
        input: Value,
        task_ctx: Option<&TaskContext>,
    ) -> ToolResult {
        let cands = self.find_by_capability(capability);
        if cands.is_empty() {
            let mut result = ToolResult::failure("no_match");
            result.meta.suggestions = self.suggest_similar(capability);
            return result;
        }
        let key = format!("cap:{}", capability.trim().to_lowercase());
        self.dispatch(
            &key,
            &cands,
            input,
            task_ctx,
            should_synthesize(capability, Some(capability), cands.len()),
        )
        .await
    }

    /// 共同的调度路径：排序 -> 单候选直调 / 批次竞速 / 批次综合 -> 顺序兜底
    async fn dispatch(
        &self,
        key: &str,
        cands: &[Arc<ToolCandidate>],
        input: Value,
        task_ctx: Option<&TaskContext>,
        synthesize: bool,
    ) -> ToolResult {
        if cands.len() == 1 {
            let result = Self::invoke(
                cands[0].clone(),
                input,
                self.tool_timeout,
                self.metrics.clone(),
            )
            .await;
            if result.success {
                self.record_success(key, 0);
            }
            return result;
        }

        let last = self.last_success_for(key);
        let mut order = order_candidates(cands, task_ctx, last);
        if order.is_empty() {
            // 任务上下文把所有候选都剔除了：退回无上下文顺序，宁可调用也不空手而归
            order = order_candidates(cands, None, last);
        }

        let batch_size = if synthesize && cands.len() <= 2 {
            order.len()
        } else {
            order.len().min(MAX_PARALLEL)
        };
        let batch: Vec<usize> = order[..batch_size].to_vec();

        let outcome = if synthesize {
            self.run_synthesis(key, cands, &batch, &input).await
        } else {
            self.run_race(key, cands, &batch, &input).await
        };
        if let Some(result) = outcome {
            return result;
        }

        // 批次全败：剩余候选按序重试
        let mut errors: Vec<String> = Vec::new();
        for idx in order[batch_size..].iter() {
            let result = Self::invoke(
                cands[*idx].clone(),
                input.clone(),
                self.tool_timeout,
                self.metrics.clone(),
            )
            .await;
            if result.success {
                self.record_success(key, *idx);
                return result;
            }
            errors.push(format!(
                "{}({}): {}",
                cands[*idx].name,
                cands[*idx].source.as_str(),
                result.error.as_deref().unwrap_or("unknown")
            ));
        }

        let mut failed = ToolResult::failure("all_candidates_failed");
        errors.truncate(5);
        failed.meta.errors = errors;
        failed
    }

    /// 竞速：批内并发，首个成功即胜出；快速完成的并列成功者参与选优。
    /// 胜者确定后取消其余任务并等待其真正退出，保证没有任务活过本次调用。
    /// 返回 None 表示批内无成功结果。
    async fn run_race(
        &self,
        key: &str,
        cands: &[Arc<ToolCandidate>],
        batch: &[usize],
        input: &Value,
    ) -> Option<ToolResult> {
        let mut set = JoinSet::new();
        for idx in batch {
            let cand = cands[*idx].clone();
            let input = input.clone();
            let timeout = self.tool_timeout;
            let metrics = self.metrics.clone();
            let idx = *idx;
            set.spawn(async move { (idx, Self::invoke(cand, input, timeout, metrics).await) });
        }

        let mut results: HashMap<usize, ToolResult> = HashMap::new();
        let mut found_success = false;
        while let Some(joined) = set.join_next().await {
            if let Ok((idx, result)) = joined {
                let success = result.success;
                results.insert(idx, result);
                if success {
                    found_success = true;
                    // 不等慢者：只收割已经完成的兄弟任务
                    while let Some(Some(extra)) = set.join_next().now_or_never() {
                        if let Ok((i, r)) = extra {
                            results.insert(i, r);
                        }
                    }
                    break;
                }
            }
        }

        // 取消未完成的任务并等待退出
        set.abort_all();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    results.insert(idx, result);
                }
                Err(e) if e.is_cancelled() => {
                    self.metrics
                        .tools
                        .cancellations
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                Err(_) => {}
            }
        }

        if !found_success && !results.values().any(|r| r.success) {
            return None;
        }

        // 多个成功结果时按质量选优
        let best_idx = results
            .iter()
            .filter(|(_, r)| r.success)
            .max_by(|(ia, ra), (ib, rb)| {
                let sa = score_result(
                    ra.result.as_ref().unwrap_or(&Value::Null),
                    &ra.text(),
                    cands[**ia].priority,
                );
                let sb = score_result(
                    rb.result.as_ref().unwrap_or(&Value::Null),
                    &rb.text(),
                    cands[**ib].priority,
                );
                sa.partial_cmp(&sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(idx, _)| *idx)?;

        self.record_success(key, best_idx);
        results.remove(&best_idx)
    }

    /// 综合：批内全部并发执行并等全部完成，成功结果交给 LLM 综合或简单合并。
    /// 返回 None 表示批内无成功结果。
    async fn run_synthesis(
        &self,
        key: &str,
        cands: &[Arc<ToolCandidate>],
        batch: &[usize],
        input: &Value,
    ) -> Option<ToolResult> {
        let mut set = JoinSet::new();
        for idx in batch {
            let cand = cands[*idx].clone();
            let input = input.clone();
            let timeout = self.tool_timeout;
            let metrics = self.metrics.clone();
            let idx = *idx;
            set.spawn(async move { (idx, Self::invoke(cand, input, timeout, metrics).await) });
        }

        let mut results: Vec<(usize, ToolResult)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(pair) = joined {
                results.push(pair);
            }
        }
        // 保持批次顺序，综合输出稳定
        results.sort_by_key(|(idx, _)| batch.iter().position(|b| b == idx).unwrap_or(usize::MAX));

        let successes: Vec<(usize, ToolResult)> =
            results.into_iter().filter(|(_, r)| r.success).collect();
        if successes.is_empty() {
            return None;
        }
        if let Some((idx, _)) = successes.first() {
            self.record_success(key, *idx);
        }
        if successes.len() == 1 {
            return Some(successes.into_iter().next().map(|(_, r)| r).unwrap());
        }

        let only_results: Vec<ToolResult> = successes.into_iter().map(|(_, r)| r).collect();
        let name = cands
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| key.to_string());
        Some(self.synthesize_results(&name, input, only_results).await)
    }

    /// 多结果综合：超长或超量走简单合并；否则 LLM 综合（10s 超时），失败再降级合并
    async fn synthesize_results(
        &self,
        tool_name: &str,
        input: &Value,
        results: Vec<ToolResult>,
    ) -> ToolResult {
        let total_len: usize = results.iter().map(|r| r.text().chars().count()).sum();
        if total_len > SYNTHESIS_TOTAL_BUDGET || results.len() > MAX_PARALLEL {
            return simple_merge(&results);
        }

        let Some(llm) = &self.llm else {
            return simple_merge(&results);
        };

        let per_result_budget = per_source_budget(tool_name, results.len());
        let blocks: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let source = r.meta.source.as_deref().unwrap_or("unknown");
                format!(
                    "工具{} ({}):\n{}",
                    i + 1,
                    source,
                    truncate_chars(&r.text(), per_result_budget)
                )
            })
            .collect();

        let query = match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let prompt = self.prompts.render(
            "toolhub_synthesis",
            &[
                ("query", truncate_chars(&query, 200).as_str()),
                ("results", blocks.join("\n").as_str()),
            ],
        );

        let opts = GenerateOptions {
            timeout: SYNTHESIS_LLM_TIMEOUT,
            ..Default::default()
        };
        match tokio::time::timeout(SYNTHESIS_LLM_TIMEOUT, llm.generate(&prompt, &opts)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                let mut merged = ToolResult {
                    success: true,
                    result: Some(Value::String(text.trim().to_string())),
                    error: None,
                    meta: ToolResultMeta::default(),
                };
                merged.meta.synthesized = true;
                merged.meta.synthesis_method = Some("llm".to_string());
                merged.meta.sources = results
                    .iter()
                    .map(|r| r.meta.source.clone().unwrap_or_else(|| "unknown".into()))
                    .collect();
                merged
            }
            _ => {
                tracing::warn!(tool = tool_name, "llm synthesis failed, falling back to merge");
                simple_merge(&results)
            }
        }
    }

    /// 未知能力时的相似建议：先找包含关系，不足时按编辑距离补齐，最多 3 条
    fn suggest_similar(&self, capability: &str) -> Vec<String> {
        let cap = capability.trim().to_lowercase();
        let mut known: Vec<String> = self.by_capability.keys().cloned().collect();
        known.sort();

        let mut out: Vec<String> = known
            .iter()
            .filter(|k| k.contains(&cap) || cap.contains(k.as_str()))
            .cloned()
            .collect();
        if out.len() < 3 {
            let mut by_distance: Vec<(usize, String)> = known
                .iter()
                .filter(|k| !out.contains(k))
                .map(|k| (edit_distance(&cap, k), k.clone()))
                .collect();
            by_distance.sort();
            out.extend(by_distance.into_iter().map(|(_, k)| k));
        }
        out.truncate(3);
        out
    }
}

/// 简单文本合并（不调用 LLM）：逐条截断并标注来源
fn simple_merge(results: &[ToolResult]) -> ToolResult {
    let parts: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let source = r.meta.source.as_deref().unwrap_or("unknown");
            format!(
                "[来源{} ({})]: {}",
                i + 1,
                source,
                truncate_chars(&r.text(), MERGE_PER_RESULT)
            )
        })
        .collect();

    let mut merged = ToolResult {
        success: true,
        result: Some(Value::String(parts.join("\n\n"))),
        error: None,
        meta: ToolResultMeta::default(),
    };
    merged.meta.synthesized = true;
    merged.meta.synthesis_method = Some("simple_merge".to_string());
    merged.meta.sources = results
        .iter()
        .map(|r| r.meta.source.clone().unwrap_or_else(|| "unknown".into()))
        .collect();
    merged
}

/// LLM 综合提示词中每个来源的截断预算
fn per_source_budget(tool_name: &str, num_results: usize) -> usize {
    let name = tool_name.to_lowercase();
    if name.contains("calc") || name.contains("计算") {
        100
    } else if name.contains("search") || name.contains("web") {
        if num_results <= 2 {
            300
        } else {
            200
        }
    } else if name.contains("extract") || name.contains("pdf") {
        300
    } else {
        250
    }
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// 固定输出工具，可配置延迟；被取消时（future 被 drop）置 cancelled 标记
    struct ScriptedTool {
        name: String,
        caps: Vec<String>,
        reply: Result<Value, String>,
        delay: Duration,
        calls: Arc<AtomicU32>,
        cancelled: Arc<AtomicBool>,
    }

    impl ScriptedTool {
        fn new(name: &str, caps: &[&str], reply: Result<Value, String>, delay: Duration) -> Self {
            Self {
                name: name.to_string(),
                caps: caps.iter().map(|s| s.to_string()).collect(),
                reply,
                delay,
                calls: Arc::new(AtomicU32::new(0)),
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct CancelFlag {
        flag: Arc<AtomicBool>,
        completed: bool,
    }

    impl Drop for CancelFlag {
        fn drop(&mut self) {
            if !self.completed {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            ""
        }
        fn capabilities(&self) -> Vec<String> {
            self.caps.clone()
        }
        async fn execute(&self, _input: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = CancelFlag {
                flag: self.cancelled.clone(),
                completed: false,
            };
            tokio::time::sleep(self.delay).await;
            guard.completed = true;
            self.reply.clone()
        }
    }

    fn hub() -> ToolHub {
        ToolHub::new(Duration::from_secs(2), Arc::new(Metrics::new()))
    }

    fn register(hub: &mut ToolHub, tool: ScriptedTool, source: ToolSource) {
        hub.register(ToolCandidate::from_tool(Arc::new(tool), source));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let h = hub();
        let r = h.execute("nope", json!("x"), None).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("tool_not_found"));
    }

    #[tokio::test]
    async fn test_single_candidate_direct_call() {
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("calc", &["calculate"], Ok(json!("14")), Duration::ZERO),
            ToolSource::Tools,
        );
        let r = h.execute("calc", json!("2+3*4"), None).await;
        assert!(r.success);
        assert_eq!(r.text(), "14");
        assert_eq!(r.meta.source.as_deref(), Some("tools"));
    }

    #[tokio::test]
    async fn test_race_fast_winner_cancels_slow_loser() {
        let mut h = hub();
        let slow = ScriptedTool::new(
            "calc",
            &["calculate"],
            Ok(json!("slow")),
            Duration::from_secs(5),
        );
        let slow_cancelled = slow.cancelled.clone();
        // 三个候选触发 pick_best 策略（calculate 类不综合，但 2 个会综合，故放 3 个）
        let fast = ScriptedTool::new(
            "calc",
            &["calculate"],
            Ok(json!("14")),
            Duration::from_millis(10),
        );
        let other = ScriptedTool::new(
            "calc",
            &["calculate"],
            Err("boom".into()),
            Duration::from_millis(5),
        );
        register(&mut h, slow, ToolSource::Mcps);
        register(&mut h, fast, ToolSource::Tools);
        register(&mut h, other, ToolSource::Skills);

        let r = h.execute("calc", json!("2+3*4"), None).await;
        assert!(r.success);
        assert_eq!(r.text(), "14");
        // 败者任务已被取消且收到了取消信号
        assert!(slow_cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_race_all_candidates_failed_is_structured() {
        let mut h = hub();
        for (name_src, reply) in [
            (ToolSource::Tools, Err("a failed".to_string())),
            (ToolSource::Skills, Err("b failed".to_string())),
            (ToolSource::Mcps, Err("c failed".to_string())),
        ] {
            register(
                &mut h,
                ScriptedTool::new("get_time", &["time"], reply, Duration::ZERO),
                name_src,
            );
        }
        let r = h.execute("get_time", json!("now"), None).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("all_candidates_failed"));
    }

    #[tokio::test]
    async fn test_batch_exhausted_falls_back_to_remaining_candidate() {
        // 4 个同能力竞速候选（计算类不综合）：前 3 个进并发批次且全败，
        // 第 4 个留在批次外，由顺序兜底调用并胜出
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("alpha_calc", &["calculate"], Err("a down".into()), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("beta_calc", &["calculate"], Err("b down".into()), Duration::ZERO),
            ToolSource::Skills,
        );
        register(
            &mut h,
            ScriptedTool::new("gamma_calc", &["calculate"], Err("c down".into()), Duration::ZERO),
            ToolSource::Mcps,
        );
        register(
            &mut h,
            ScriptedTool::new("zeta_calc", &["calculate"], Ok(json!("42")), Duration::ZERO),
            ToolSource::Mcps,
        );

        // 确定性排序 (priority, source, name) 把 zeta_calc 排在批次（前 3）之外
        let cands = h.find_by_capability("calculate");
        assert_eq!(cands.len(), 4);
        let order = order_candidates(&cands, None, None);
        assert_eq!(cands[order[3]].name, "zeta_calc");

        let r = h.execute_by_capability("calculate", json!("6*7"), None).await;
        assert!(r.success);
        assert_eq!(r.text(), "42");
        assert_eq!(r.meta.source.as_deref(), Some("mcps"));
        // 兜底成功者被记为最近成功候选，下次排到最前
        assert_eq!(h.last_success_for("cap:calculate"), Some(order[3]));
        let next_order = order_candidates(&cands, None, h.last_success_for("cap:calculate"));
        assert_eq!(cands[next_order[0]].name, "zeta_calc");
    }

    #[tokio::test]
    async fn test_two_search_candidates_synthesize_simple_merge() {
        // 不配 LLM：综合走简单合并
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!("result A")), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!("result B")), Duration::ZERO),
            ToolSource::Mcps,
        );
        let r = h.execute("search_web", json!("rust"), None).await;
        assert!(r.success);
        assert!(r.meta.synthesized);
        assert_eq!(r.meta.sources.len(), 2);
        let text = r.text();
        assert!(text.contains("result A") && text.contains("result B"));
    }

    #[tokio::test]
    async fn test_synthesis_via_llm() {
        let llm = Arc::new(crate::llm::MockLlm::new("combined A+B"));
        let mut h = hub().with_llm(llm);
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!("result A")), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!("result B")), Duration::ZERO),
            ToolSource::Skills,
        );
        let r = h.execute("search_web", json!("rust"), None).await;
        assert!(r.success);
        assert!(r.meta.synthesized);
        assert_eq!(r.meta.synthesis_method.as_deref(), Some("llm"));
        assert_eq!(r.text(), "combined A+B");
    }

    #[tokio::test]
    async fn test_oversized_results_skip_llm_synthesis() {
        let llm = Arc::new(crate::llm::MockLlm::new("should not be used"));
        let mut h = hub().with_llm(llm);
        let big = "x".repeat(1500);
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!(big.clone())), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search"], Ok(json!(big)), Duration::ZERO),
            ToolSource::Skills,
        );
        let r = h.execute("search_web", json!("rust"), None).await;
        assert!(r.success);
        assert_eq!(r.meta.synthesis_method.as_deref(), Some("simple_merge"));
    }

    #[tokio::test]
    async fn test_execute_by_capability_unknown_gives_suggestions() {
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("search_web", &["search", "web"], Ok(json!("A")), Duration::ZERO),
            ToolSource::Tools,
        );
        let r = h.execute_by_capability("searhc", json!("q"), None).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("no_match"));
        assert!(!r.meta.suggestions.is_empty());
        assert!(r.meta.suggestions.contains(&"search".to_string()));
    }

    #[tokio::test]
    async fn test_execute_by_capability_runs_matching_tools() {
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("alpha_search", &["search"], Ok(json!("from alpha")), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("beta_search", &["search"], Ok(json!("from beta")), Duration::ZERO),
            ToolSource::Skills,
        );
        let r = h.execute_by_capability("search", json!("q"), None).await;
        assert!(r.success);
        assert!(r.meta.synthesized);
    }

    #[tokio::test]
    async fn test_tool_timeout_converted_to_failure() {
        let mut h = ToolHub::new(Duration::from_millis(50), Arc::new(Metrics::new()));
        register(
            &mut h,
            ScriptedTool::new("slow", &["analyze"], Ok(json!("late")), Duration::from_secs(5)),
            ToolSource::Tools,
        );
        let r = h.execute("slow", json!("q"), None).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("tool_timeout"));
    }

    #[tokio::test]
    async fn test_last_success_sticky_ordering() {
        let mut h = hub();
        register(
            &mut h,
            ScriptedTool::new("calc", &["calculate"], Err("down".into()), Duration::ZERO),
            ToolSource::Tools,
        );
        register(
            &mut h,
            ScriptedTool::new("calc", &["calculate"], Ok(json!("42")), Duration::from_millis(5)),
            ToolSource::Skills,
        );
        register(
            &mut h,
            ScriptedTool::new("calc", &["calculate"], Err("down".into()), Duration::ZERO),
            ToolSource::Mcps,
        );
        let r1 = h.execute("calc", json!("6*7"), None).await;
        assert!(r1.success);
        // 成功索引被记住：skills 候选（下标 1）
        assert_eq!(h.last_success_for("calc"), Some(1));
        let cands = h.by_name.get("calc").unwrap();
        let order = order_candidates(cands, None, h.last_success_for("calc"));
        assert_eq!(order[0], 1);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("search", "searhc"), 2);
        assert_eq!(edit_distance("time", "time"), 0);
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }
}
