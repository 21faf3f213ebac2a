//! 对话历史工具：查询短期记忆
//!
//! 查询形态：last | last_user | all | <N>。任务进行中存在历史快照时一律读快照，
//! 因此「我刚刚问了什么」不会把正在处理的这条问题当成历史。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::{ConversationMemory, Role};
use crate::tools::{input_as_str, Tool};

/// 对话历史工具：持有与编排器共享的记忆句柄
pub struct ConversationHistoryTool {
    memory: Arc<Mutex<ConversationMemory>>,
}

impl ConversationHistoryTool {
    pub fn new(memory: Arc<Mutex<ConversationMemory>>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ConversationHistoryTool {
    fn name(&self) -> &str {
        "get_conversation_history"
    }

    fn description(&self) -> &str {
        "获取对话历史，可以查看之前的用户问题和助手回答"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["history".to_string()]
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let query = input_as_str(&input).trim().to_lowercase();
        let memory = self.memory.lock().map_err(|_| "memory lock poisoned")?;

        match query.as_str() {
            "last" => {
                let recent = memory.recent(1, true);
                match recent.last() {
                    Some(entry) => Ok(json!({
                        "role": entry.role.as_str(),
                        "content": entry.content,
                        "timestamp": entry.timestamp,
                        "formatted": format!("[{}]: {}", entry.role.as_str(), entry.content),
                    })),
                    None => Ok(json!({"formatted": "对话历史为空"})),
                }
            }
            "last_user" => {
                let recent = memory.recent(20, true);
                match recent.iter().rev().find(|e| e.role == Role::User) {
                    Some(entry) => Ok(json!({
                        "role": "user",
                        "content": entry.content,
                        "timestamp": entry.timestamp,
                        "formatted": format!("用户问题: {}", entry.content),
                    })),
                    None => Ok(json!({"formatted": "未找到用户消息"})),
                }
            }
            "all" => {
                let recent = memory.recent(100, true);
                Ok(format_entries(&recent))
            }
            other => {
                let n = other.parse::<usize>().unwrap_or(10);
                let recent = memory.recent(n, true);
                Ok(format_entries(&recent))
            }
        }
    }
}

fn format_entries(entries: &[crate::memory::ConversationEntry]) -> Value {
    if entries.is_empty() {
        return json!({"messages": [], "count": 0, "formatted": "对话历史为空"});
    }
    let lines: Vec<String> = entries
        .iter()
        .map(|e| format!("[{}]: {}", e.role.as_str(), e.content))
        .collect();
    json!({
        "messages": entries,
        "count": entries.len(),
        "formatted": lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationEntry;

    fn memory_with_turns() -> Arc<Mutex<ConversationMemory>> {
        let mut mem = ConversationMemory::new(10);
        mem.append(ConversationEntry::user("what time is it?"));
        mem.append(ConversationEntry::assistant("10:00", None));
        // 模拟正在处理第二个问题：先快照，再追加进行中的输入
        mem.create_snapshot();
        mem.append(ConversationEntry::user("what did I just ask?"));
        Arc::new(Mutex::new(mem))
    }

    #[tokio::test]
    async fn test_last_user_reads_snapshot() {
        let tool = ConversationHistoryTool::new(memory_with_turns());
        let out = tool.execute(json!("last_user")).await.unwrap();
        assert_eq!(out["content"], "what time is it?");
    }

    #[tokio::test]
    async fn test_all_excludes_in_flight_question() {
        let tool = ConversationHistoryTool::new(memory_with_turns());
        let out = tool.execute(json!("all")).await.unwrap();
        assert_eq!(out["count"], 2);
        assert!(!out["formatted"]
            .as_str()
            .unwrap()
            .contains("what did I just ask?"));
    }

    #[tokio::test]
    async fn test_numeric_query() {
        let tool = ConversationHistoryTool::new(memory_with_turns());
        let out = tool.execute(json!("1")).await.unwrap();
        assert_eq!(out["count"], 1);
    }
}
