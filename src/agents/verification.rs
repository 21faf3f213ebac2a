//! 验证 Agent：对步骤结果做一致性与逻辑检查
//!
//! 一致性：与此前成功结果的 Jaccard 相似度，> 0.9 疑似重复、< 0.05 疑似漂移
//! （仅当该步骤声明依赖前序步骤时）。逻辑：数值量级（|v| > 1e15 视为异常）、
//! 时间串需含可识别日期格式、文本需非空白。验证只记录发现，从不阻断步骤推进。

use std::collections::HashSet;

use regex::Regex;

use crate::workflow::types::{Step, StepResult, Verification};

/// 疑似重复阈值
const DUPLICATE_THRESHOLD: f64 = 0.9;
/// 疑似漂移阈值
const DRIFT_THRESHOLD: f64 = 0.05;
/// 数值量级上限
const MAX_MAGNITUDE: f64 = 1e15;

/// 验证 Agent（无状态）
#[derive(Debug, Default)]
pub struct VerificationAgent;

impl VerificationAgent {
    pub fn new() -> Self {
        Self
    }

    /// 验证最新一步结果；prior 为此前全部结果（不含本步）
    pub fn verify(&self, step: &Step, result: &StepResult, prior: &[StepResult]) -> Verification {
        let mut verification = Verification {
            step_id: result.step_id,
            verified: false,
            confidence: 0.0,
            consistency_check: false,
            logic_check: false,
            issues: Vec::new(),
        };

        if !result.success {
            verification
                .issues
                .push(format!("步骤执行失败: {}", result.error.as_deref().unwrap_or("unknown")));
            return verification;
        }

        verification.verified = true;
        verification.confidence = 0.7;

        let text = result.result.as_deref().unwrap_or("");
        let refines_prior = !step.dependencies.is_empty();

        match self.check_consistency(text, prior, refines_prior) {
            Ok(()) => {
                verification.consistency_check = true;
                verification.confidence += 0.1;
            }
            Err(issue) => verification.issues.push(issue),
        }

        match self.check_logic(text) {
            Ok(()) => {
                verification.logic_check = true;
                verification.confidence += 0.1;
            }
            Err(issue) => verification.issues.push(issue),
        }

        let source_count = result
            .raw
            .as_ref()
            .map(|r| r.meta.sources.len())
            .unwrap_or(0);
        if source_count >= 2 {
            verification.confidence += 0.1;
        }

        verification.confidence = verification.confidence.min(1.0);
        verification
    }

    fn check_consistency(
        &self,
        text: &str,
        prior: &[StepResult],
        refines_prior: bool,
    ) -> Result<(), String> {
        let prior_texts: Vec<&str> = prior
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.result.as_deref())
            .collect();
        if prior_texts.is_empty() {
            return Ok(());
        }

        let max_similarity = prior_texts
            .iter()
            .map(|p| jaccard_similarity(text, p))
            .fold(0.0f64, f64::max);

        if max_similarity > DUPLICATE_THRESHOLD {
            return Err(format!("疑似重复前序结果（相似度 {:.2}）", max_similarity));
        }
        if refines_prior && max_similarity < DRIFT_THRESHOLD {
            return Err(format!("疑似偏离前序结果（相似度 {:.2}）", max_similarity));
        }
        Ok(())
    }

    fn check_logic(&self, text: &str) -> Result<(), String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("结果为空白".to_string());
        }

        let number_re = Regex::new(r"-?\d+\.?\d*").expect("valid regex");
        for m in number_re.find_iter(trimmed) {
            if let Ok(value) = m.as_str().parse::<f64>() {
                if value.abs() > MAX_MAGNITUDE {
                    return Err(format!("数值量级异常: {}", m.as_str()));
                }
            }
        }

        // 看起来像纯时间戳的结果必须带可识别的日期格式
        let looks_like_timestamp = trimmed.to_lowercase().contains("utc")
            || trimmed.contains("时间:")
            || trimmed.ends_with('Z') && trimmed.contains('T');
        if looks_like_timestamp {
            let date_re =
                Regex::new(r"\d{4}-\d{2}-\d{2}|\d{4}年\d{1,2}月\d{1,2}日").expect("valid regex");
            if !date_re.is_match(trimmed) {
                return Err("时间结果缺少可识别日期格式".to_string());
            }
        }
        Ok(())
    }
}

/// 词集 Jaccard 相似度
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    inter as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_with_deps(deps: Vec<u32>) -> Step {
        Step {
            id: 2,
            description: "refine".into(),
            tool_type: "none".into(),
            dependencies: deps,
            complexity: None,
            estimated_time: None,
        }
    }

    fn ok_result(step_id: u32, text: &str) -> StepResult {
        StepResult {
            step_id,
            success: true,
            result: Some(text.into()),
            method: "direct_reasoning".into(),
            error: None,
            raw: None,
        }
    }

    #[test]
    fn test_failed_step_gets_zero_confidence() {
        let agent = VerificationAgent::new();
        let result = StepResult::failed(1, "toolhub_calculate", "boom");
        let v = agent.verify(&step_with_deps(vec![]), &result, &[]);
        assert!(!v.verified);
        assert_eq!(v.confidence, 0.0);
        assert!(!v.issues.is_empty());
    }

    #[test]
    fn test_clean_result_scores_point_nine() {
        let agent = VerificationAgent::new();
        let result = ok_result(1, "Rust 于 2015-05-15 发布 1.0 版本");
        let v = agent.verify(&step_with_deps(vec![]), &result, &[]);
        assert!(v.verified);
        assert!(v.consistency_check && v.logic_check);
        assert!((v.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_flagged() {
        let agent = VerificationAgent::new();
        let prior = vec![ok_result(1, "the quick brown fox jumps")];
        let result = ok_result(2, "the quick brown fox jumps");
        let v = agent.verify(&step_with_deps(vec![1]), &result, &prior);
        assert!(!v.consistency_check);
        assert!(v.issues.iter().any(|i| i.contains("重复")));
    }

    #[test]
    fn test_drift_flagged_only_when_refining() {
        let agent = VerificationAgent::new();
        let prior = vec![ok_result(1, "alpha beta gamma")];
        let result = ok_result(2, "entirely unrelated drifting words here");

        let refining = agent.verify(&step_with_deps(vec![1]), &result, &prior);
        assert!(!refining.consistency_check);

        let independent = agent.verify(&step_with_deps(vec![]), &result, &prior);
        assert!(independent.consistency_check);
    }

    #[test]
    fn test_absurd_magnitude_rejected() {
        let agent = VerificationAgent::new();
        let result = ok_result(1, "结果是 99999999999999999999");
        let v = agent.verify(&step_with_deps(vec![]), &result, &[]);
        assert!(!v.logic_check);
    }

    #[test]
    fn test_multi_source_bonus() {
        use crate::hub::{ToolResult, ToolResultMeta};
        let agent = VerificationAgent::new();
        let mut result = ok_result(1, "合并后的答案内容");
        result.raw = Some(ToolResult {
            success: true,
            result: None,
            error: None,
            meta: ToolResultMeta {
                synthesized: true,
                sources: vec!["tools".into(), "mcps".into()],
                ..Default::default()
            },
        });
        let v = agent.verify(&step_with_deps(vec![]), &result, &[]);
        assert!((v.confidence - 1.0).abs() < 1e-9);
    }
}
