//! 回合过程事件：用于 CLI / 前端展示推理轮次、工具调用、结果与检查点

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 开始一次推理（cycle = 本轮已完成的调度次数）
    CycleStarted { session_id: String, cycle: usize },
    /// 推理节点请求调用工具
    ToolCall {
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        call_id: String,
        tool: String,
        is_error: bool,
        preview: String,
    },
    /// 日志已写入检查点
    Checkpointed { entries: usize },
    /// 最终回答
    Answer { text: String },
    /// 本轮失败
    Failed { error: String },
}
