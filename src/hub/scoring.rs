//! 候选排序与结果打分
//!
//! 有任务上下文（路由产出的 TaskContext）时按 能力匹配 50% + 成本 25% + 属性 25%
//! 打分排序，并给最近成功候选加分；无上下文时按 最近成功优先 -> (priority, source, name)
//! 的确定性顺序。竞速后的多个成功结果按 长度 50% + 质量 20% + 优先级 30% 选优。

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hub::candidate::ToolCandidate;

/// 属性标签级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeLevel {
    High,
    #[default]
    Medium,
    Low,
}

/// 任务属性标签：时效性 / 可靠性 / 成本敏感
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeTags {
    pub timeliness: AttributeLevel,
    pub reliability: AttributeLevel,
    pub cost_sensitivity: AttributeLevel,
}

/// 任务路由产出的上下文，进入 ToolHub 做候选打分
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub use_tools: bool,
    pub capability_tags: Vec<String>,
    pub attribute_tags: AttributeTags,
    pub adapt_carriers: Vec<String>,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self {
            use_tools: true,
            capability_tags: Vec::new(),
            attribute_tags: AttributeTags::default(),
            adapt_carriers: vec!["tools".into(), "skills".into(), "mcps".into()],
        }
    }
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let sb: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// 候选成本分：本地=9、skill=7、mcp=4，归一化到 /9
fn cost_score(cand: &ToolCandidate) -> f64 {
    let raw = match cand.source {
        crate::hub::candidate::ToolSource::Tools => 9.0,
        crate::hub::candidate::ToolSource::Skills => 7.0,
        crate::hub::candidate::ToolSource::Mcps => 4.0,
    };
    raw / 9.0
}

/// 属性匹配分：可靠性高 / 时效性高偏好本地载体，成本敏感高时 mcp 降权；归一化到 [0,1]
fn attribute_score(cand: &ToolCandidate, tags: &AttributeTags) -> f64 {
    let mut hits = 0.0;
    if tags.reliability == AttributeLevel::High && cand.source.is_local_carrier() {
        hits += 1.0;
    }
    if tags.timeliness == AttributeLevel::High && cand.source.is_local_carrier() {
        hits += 1.0;
    }
    if tags.cost_sensitivity == AttributeLevel::High && cand.source.is_local_carrier() {
        hits += 1.0;
    }
    hits / 3.0
}

/// 确定性平手序：(priority, source, name)
fn tie_key(cand: &ToolCandidate) -> (u8, &'static str, &str) {
    (cand.priority, cand.source.as_str(), cand.name.as_str())
}

/// 返回候选下标的调用顺序
///
/// - 有 task_ctx 且能力标签非空：打分排序，能力交集为零的候选剔除
/// - 否则：最近成功者排最前，其余按 (priority, source, name)
pub fn order_candidates(
    cands: &[Arc<ToolCandidate>],
    task_ctx: Option<&TaskContext>,
    last_success: Option<usize>,
) -> Vec<usize> {
    if let Some(ctx) = task_ctx {
        if !ctx.capability_tags.is_empty() {
            let mut scored: Vec<(usize, f64)> = Vec::new();
            for (idx, cand) in cands.iter().enumerate() {
                let fit = jaccard(&cand.capabilities, &ctx.capability_tags);
                if fit == 0.0 {
                    continue;
                }
                let mut score = 0.5 * fit
                    + 0.25 * cost_score(cand)
                    + 0.25 * attribute_score(cand, &ctx.attribute_tags);
                if last_success == Some(idx) {
                    score += 1.0;
                }
                scored.push((idx, score));
            }
            scored.sort_by(|(ia, sa), (ib, sb)| {
                sb.partial_cmp(sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| tie_key(&cands[*ia]).cmp(&tie_key(&cands[*ib])))
            });
            return scored.into_iter().map(|(idx, _)| idx).collect();
        }
    }

    let mut order: Vec<usize> = (0..cands.len()).collect();
    order.sort_by(|a, b| tie_key(&cands[*a]).cmp(&tie_key(&cands[*b])));
    if let Some(idx) = last_success {
        if idx < cands.len() {
            order.retain(|i| *i != idx);
            order.insert(0, idx);
        }
    }
    order
}

/// 结果文本长度分：过短 0.3，500 字符处到 1.0，2000 以上缓慢衰减
fn length_score(len: usize) -> f64 {
    if len < 10 {
        0.3
    } else if len <= 500 {
        len as f64 / 500.0
    } else if len <= 2000 {
        0.8 - (len as f64 - 500.0) / 1500.0 * 0.3
    } else {
        0.5 * (1.0 - ((len as f64 - 2000.0) / 5000.0).min(0.5))
    }
}

/// 结构化质量分：map 结构 0.2，含 results/data/content/items 字段再 +0.1
fn quality_score(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Object(map) => {
            let mut q = 0.2;
            if ["results", "data", "content", "items"]
                .iter()
                .any(|k| map.contains_key(*k))
            {
                q += 0.1;
            }
            q
        }
        _ => 0.0,
    }
}

/// 竞速成功结果综合评分：长度 50% + 质量 20% + 优先级 30%（priority_score = 1 - p/3）
pub fn score_result(value: &serde_json::Value, text: &str, priority: u8) -> f64 {
    let priority_score = 1.0 - priority.min(3) as f64 / 3.0;
    0.5 * length_score(text.chars().count()) + 0.2 * quality_score(value) + 0.3 * priority_score
}

/// 是否综合多候选结果（而不是竞速选最优）
///
/// 计算 / 时间类一律选最优（结果应一致）；搜索 / 提取类综合（信息互补）；
/// 其余类型恰好 2 个跨来源候选时综合，超过 3 个选最优，3 个默认综合。
pub fn should_synthesize(tool_name: &str, capability: Option<&str>, num_tools: usize) -> bool {
    if num_tools <= 1 {
        return false;
    }

    let name = tool_name.to_lowercase();
    let cap = capability.unwrap_or("").to_lowercase();
    let hit = |keywords: &[&str]| {
        keywords
            .iter()
            .any(|kw| name.contains(kw) || cap.contains(kw))
    };

    if hit(&["calculate", "calc", "计算", "math"]) {
        return false;
    }
    if hit(&["time", "时间", "date", "日期"]) {
        return false;
    }
    if hit(&["search", "搜索", "检索", "查找", "query", "web"]) {
        return true;
    }
    if hit(&["extract", "提取", "parse", "解析", "pdf", "document", "文档"]) {
        return true;
    }
    if num_tools <= 2 {
        return true;
    }
    num_tools <= 3
}
