//! 短期记忆：对话历史与处理前快照
//!
//! 有界 FIFO（默认 100 条），每次任务开始前先 create_snapshot 冻结「处理前」视图，
//! 任务结束（无论成败）clear_snapshot。涉及「刚刚 / 之前」时间语义的历史查询读快照，
//! 保证当前进行中的问题不会出现在它自己的历史里。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 单条对话记录，入库后不再修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// 短期记忆：有界对话序列 + 可选快照（同一时刻至多一份，重复创建覆盖旧快照）
#[derive(Debug)]
pub struct ConversationMemory {
    entries: VecDeque<ConversationEntry>,
    capacity: usize,
    snapshot: Option<Vec<ConversationEntry>>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            snapshot: None,
        }
    }

    /// O(1) 追加；超出容量丢弃最旧一条
    pub fn append(&mut self, entry: ConversationEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 冻结当前序列为「处理前」视图
    pub fn create_snapshot(&mut self) {
        self.snapshot = Some(self.entries.iter().cloned().collect());
    }

    pub fn clear_snapshot(&mut self) {
        self.snapshot = None;
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// 最近 n 条；use_snapshot 且快照存在时读快照，否则读实时序列
    pub fn recent(&self, n: usize, use_snapshot: bool) -> Vec<ConversationEntry> {
        let view: Vec<&ConversationEntry> = match (&self.snapshot, use_snapshot) {
            (Some(snap), true) => snap.iter().collect(),
            _ => self.entries.iter().collect(),
        };
        let start = view.len().saturating_sub(n);
        view[start..].iter().map(|e| (*e).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.snapshot = None;
    }
}
