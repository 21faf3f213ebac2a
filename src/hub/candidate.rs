//! 工具候选：多来源统一描述
//!
//! 同一工具名可有多个候选（本地 tools / skills / mcps），全局优先级 tools > skills > mcps。
//! 能力标签来自工具自身声明，兜底从描述与名称中按关键词提取。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tools::Tool;

/// 候选来源；priority 越小越优先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Tools,
    Skills,
    Mcps,
}

impl ToolSource {
    pub fn priority(&self) -> u8 {
        match self {
            ToolSource::Tools => 0,
            ToolSource::Skills => 1,
            ToolSource::Mcps => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Tools => "tools",
            ToolSource::Skills => "skills",
            ToolSource::Mcps => "mcps",
        }
    }

    /// 本地载体（本地工具与 skill），属性打分时优先于 mcp
    pub fn is_local_carrier(&self) -> bool {
        matches!(self, ToolSource::Tools | ToolSource::Skills)
    }
}

/// 注册进 ToolHub 的一条候选；注册后不可变
pub struct ToolCandidate {
    pub name: String,
    pub source: ToolSource,
    pub tool: Arc<dyn Tool>,
    pub priority: u8,
    pub capabilities: Vec<String>,
    pub description: String,
}

impl ToolCandidate {
    /// 从工具构造：优先级取来源默认值，能力标签为空时自动提取
    pub fn from_tool(tool: Arc<dyn Tool>, source: ToolSource) -> Self {
        let name = tool.name().to_string();
        let description = tool.description().to_string();
        let mut capabilities = tool.capabilities();
        let extracted = extract_capabilities(&description, &name);
        for cap in extracted {
            if !capabilities.contains(&cap) {
                capabilities.push(cap);
            }
        }
        capabilities.sort();
        Self {
            name,
            source,
            priority: source.priority(),
            capabilities,
            description,
            tool,
        }
    }
}

/// 能力标签关键词表（关键词 -> 标签），中英双语
const CAPABILITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("search", &["search", "搜索", "检索", "查找", "find", "query"]),
    ("web", &["web", "网络", "internet", "online"]),
    ("research", &["research", "研究", "调研", "investigate"]),
    ("calculate", &["calculate", "计算", "compute", "math", "数学"]),
    ("time", &["time", "时间", "clock", "date", "日期", "当前"]),
    ("weather", &["weather", "天气", "forecast", "预报"]),
    ("document", &["document", "文档", "file", "文件", "pdf", "docx", "xlsx"]),
    ("pdf", &["pdf"]),
    ("extract", &["extract", "提取", "parse", "解析"]),
    ("analyze", &["analyze", "分析", "summary", "总结"]),
    ("test", &["test", "测试", "automation", "自动化"]),
    ("map", &["map", "地图", "location", "位置"]),
    ("history", &["history", "历史", "conversation", "对话", "previous", "之前"]),
    ("filesystem", &["目录", "directory", "folder", "工作区", "workspace"]),
];

/// 从描述与名称中自动提取能力标签
pub fn extract_capabilities(description: &str, name: &str) -> Vec<String> {
    let text = format!("{} {}", description, name).to_lowercase();
    let mut found: Vec<String> = CAPABILITY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
        .map(|(cap, _)| cap.to_string())
        .collect();

    // 完全没匹配时至少按名称推断一个基础标签
    if found.is_empty() {
        let name_lower = name.to_lowercase();
        if name_lower.contains("calc") {
            found.push("calculate".to_string());
        } else if name_lower.contains("time") {
            found.push("time".to_string());
        } else if name_lower.contains("search") {
            found.push("search".to_string());
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CalculatorTool;

    #[test]
    fn test_extract_capabilities_bilingual() {
        let caps = extract_capabilities("使用搜索引擎搜索网络信息", "search_web");
        assert!(caps.contains(&"search".to_string()));
        assert!(caps.contains(&"web".to_string()));
    }

    #[test]
    fn test_extract_fallback_by_name() {
        let caps = extract_capabilities("", "my_calc_v2");
        assert_eq!(caps, vec!["calculate".to_string()]);
    }

    #[test]
    fn test_from_tool_merges_declared_and_extracted() {
        let cand = ToolCandidate::from_tool(Arc::new(CalculatorTool), ToolSource::Tools);
        assert_eq!(cand.priority, 0);
        assert!(cand.capabilities.contains(&"calculate".to_string()));
    }

    #[test]
    fn test_source_ordering() {
        assert!(ToolSource::Tools.priority() < ToolSource::Skills.priority());
        assert!(ToolSource::Skills.priority() < ToolSource::Mcps.priority());
        assert!(ToolSource::Tools.is_local_carrier());
        assert!(!ToolSource::Mcps.is_local_carrier());
    }
}
