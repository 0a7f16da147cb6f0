//! 会话日志：Entry 与只追加的 MessageLog
//!
//! 日志是持久化的最小单位。Entry 只能追加，不能重排或原地修改；
//! 一轮对话中尚未成功写入检查点的条目视为「未提交」，失败时可整体丢弃。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// 条目角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// 推理节点请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// 日志中的一条记录（用户输入 / 助手输出 / 工具结果）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// 仅助手条目可能携带
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅工具结果条目携带，指回它所回答的 call_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 工具结果是否为错误载荷
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Entry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    /// 最终回答
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    /// 请求工具调用的助手条目；content 可为空
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            is_error: false,
        }
    }

    pub fn tool_error(call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(call_id, payload)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 助手最终回答：无工具调用
    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }

    /// 检查助手条目是否满足推理输出约定：
    /// 要么 content 非空且无调用，要么至少一个调用且 call_id 在条目内唯一。
    pub fn check_assistant_shape(&self) -> Result<(), String> {
        if self.role != Role::Assistant {
            return Err(format!("expected assistant entry, got {:?}", self.role));
        }
        if self.tool_calls.is_empty() {
            if self.content.trim().is_empty() {
                return Err("assistant entry has neither content nor tool calls".to_string());
            }
            return Ok(());
        }
        let mut seen = HashSet::new();
        for call in &self.tool_calls {
            if call.call_id.is_empty() {
                return Err(format!("tool call to '{}' has an empty call_id", call.tool_name));
            }
            if call.tool_name.is_empty() {
                return Err(format!("tool call '{}' has an empty tool name", call.call_id));
            }
            if !seen.insert(call.call_id.as_str()) {
                return Err(format!("duplicate call_id '{}'", call.call_id));
            }
        }
        Ok(())
    }
}

/// 只追加的会话日志；`committed` 之前的部分已写入检查点
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: Vec<Entry>,
    committed: usize,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从检查点恢复：全部条目视为已提交
    pub fn restore(entries: Vec<Entry>) -> Self {
        let committed = entries.len();
        Self { entries, committed }
    }

    pub fn append(&mut self, entry: Entry) {
        debug_assert!(
            entry.role != Role::ToolResult
                || entry
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| self.unanswered_calls().iter().any(|c| c.call_id == id)),
            "tool result must answer a pending call"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 检查点写入成功后调用
    pub fn mark_committed(&mut self) {
        self.committed = self.entries.len();
    }

    pub fn uncommitted_len(&self) -> usize {
        self.entries.len() - self.committed
    }

    /// 丢弃本轮尚未提交的条目，返回丢弃数量
    pub fn discard_uncommitted(&mut self) -> usize {
        let dropped = self.uncommitted_len();
        self.entries.truncate(self.committed);
        dropped
    }

    /// 最后一条助手工具调用条目中尚无结果的调用（按原顺序）
    pub fn unanswered_calls(&self) -> Vec<ToolCall> {
        let Some(idx) = self
            .entries
            .iter()
            .rposition(|e| e.role == Role::Assistant)
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.entries[idx + 1..]
            .iter()
            .filter(|e| e.role == Role::ToolResult)
            .filter_map(|e| e.tool_call_id.as_deref())
            .collect();
        self.entries[idx]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.call_id.as_str()))
            .cloned()
            .collect()
    }

    /// 最后一条用户条目之后已发生的调度轮数
    pub fn cycles_since_last_user(&self) -> usize {
        let start = self
            .entries
            .iter()
            .rposition(|e| e.role == Role::User)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries[start..]
            .iter()
            .filter(|e| e.role == Role::Assistant && e.has_tool_calls())
            .count()
    }

}
