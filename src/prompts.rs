//! 进程内提示词表
//!
//! 启动时构建 key -> 模板 的内存表，渲染时按 {placeholder} 做显式参数替换；
//! 缺参时保留原占位符而不报错。模板均要求 LLM 直接给答案 / 纯 JSON，便于容错解析。

use std::collections::HashMap;

/// 规划：问题分解为 JSON 计划
const PLANNING_DECOMPOSITION: &str = r#"你是任务规划专家。请将下面的问题分解为可顺序执行的步骤，输出纯 JSON（不要 markdown 代码块、不要解释）。

问题：{question}

可用工具：{tools_list}

输出格式：
{"steps": [{"id": 1, "description": "...", "tool_type": "none", "dependencies": [], "complexity": 2, "estimated_time": 5}], "parallel_groups": [], "total_estimated_time": 10}

规则：
1. id 从 1 开始连续递增；dependencies 只能引用更小的 id
2. tool_type 取 "none"（直接推理）或上面列出的工具名
3. 简单问题可以只有一步
"#;

/// 执行：直接推理（tool_type = none）
const EXECUTION_DIRECT_REASONING: &str = r#"请回答以下问题：
{step_desc}

如果需要参考之前步骤的结果，请使用以下信息：
{context_info}

请直接给出答案，不要包含推理过程。"#;

/// 合成：基于步骤结果生成最终答案
const SYNTHESIS_EVIDENCE: &str = r#"基于以下步骤的结果，请生成一个简洁、准确的最终答案。

步骤结果：
{context}

问题：{question}

请直接给出最终答案，不要包含推理过程或多余解释。"#;

/// 合成降级：所有步骤失败时直接回答
const SYNTHESIS_FALLBACK_DIRECT: &str = r#"请直接回答以下问题，给出简洁准确的答案：

问题：{question}

请直接给出答案，不要包含推理过程。"#;

/// 合成降级：最终兜底文案
const SYNTHESIS_FALLBACK_NO_ANSWER: &str = "Unable to produce an answer";

/// ToolHub：多工具结果综合
const TOOLHUB_SYNTHESIS: &str = r#"你是一个信息综合专家。请综合以下多个工具的执行结果，生成一个准确、全面的答案。

原始查询: {query}

工具执行结果:
{results}

要求:
1. 综合所有工具的结果，提取关键信息
2. 如果多个工具提供了相同的信息，可以合并
3. 如果工具结果有冲突，请指出并说明
4. 如果工具结果互补，请整合所有信息

请直接给出综合后的答案，不要包含推理过程："#;

/// 任务路由：system 指令 + 输出格式
const ROUTER_SYSTEM: &str = r#"你是任务先验路由器。对用户输入做三层判断：是否需要调用工具、涉及哪些能力标签、属性标签（时效性/可靠性/成本敏感）、适配载体。

只输出一个 JSON 对象，不要解释：
{"use_tools": true, "capability_tags": ["search"], "attribute_tags": {"timeliness": "medium", "reliability": "medium", "cost_sensitivity": "low"}, "adapt_carriers": ["tools", "skills", "mcps"]}

capability_tags 从以下取值：search, web, research, calculate, time, weather, document, pdf, extract, analyze, test, map, history, filesystem
attribute_tags 三项取值：high / medium / low"#;

/// 任务路由：用户输入模板
const ROUTER_USER: &str = "用户输入：{question}";

/// 提示词表：key -> 模板
pub struct PromptTable {
    templates: HashMap<&'static str, &'static str>,
}

impl Default for PromptTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTable {
    /// 内置模板集（外部 YAML 装载在边界层之外）
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert("planning_decomposition", PLANNING_DECOMPOSITION);
        templates.insert("execution_direct_reasoning", EXECUTION_DIRECT_REASONING);
        templates.insert("synthesis_evidence", SYNTHESIS_EVIDENCE);
        templates.insert("synthesis_fallback_direct", SYNTHESIS_FALLBACK_DIRECT);
        templates.insert("synthesis_fallback_no_answer", SYNTHESIS_FALLBACK_NO_ANSWER);
        templates.insert("toolhub_synthesis", TOOLHUB_SYNTHESIS);
        templates.insert("router_system", ROUTER_SYSTEM);
        templates.insert("router_user", ROUTER_USER);
        Self { templates }
    }

    /// 原始模板，不做替换；key 不存在时返回空串
    pub fn raw(&self, key: &str) -> &str {
        self.templates.get(key).copied().unwrap_or("")
    }

    /// 渲染模板：{name} 逐对替换；缺参保留原占位符
    pub fn render(&self, key: &str, args: &[(&str, &str)]) -> String {
        let mut out = self.raw(key).to_string();
        for (name, value) in args {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let table = PromptTable::builtin();
        let out = table.render(
            "execution_direct_reasoning",
            &[("step_desc", "计算 2+3"), ("context_info", "")],
        );
        assert!(out.contains("计算 2+3"));
        assert!(!out.contains("{step_desc}"));
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let table = PromptTable::builtin();
        assert_eq!(table.render("no_such_key", &[]), "");
    }

    #[test]
    fn test_missing_arg_keeps_placeholder() {
        let table = PromptTable::builtin();
        let out = table.render("router_user", &[]);
        assert!(out.contains("{question}"));
    }
}
