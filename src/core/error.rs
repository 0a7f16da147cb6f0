//! 错误分类
//!
//! 单个工具的失败不会中断整轮对话（转为工具结果载荷交给推理节点）；
//! 推理失败与持久化失败会中止本轮并原样返回给调用方。

use std::time::Duration;

use thiserror::Error;

/// 推理节点失败：外部能力不可达、超时或返回无法解析的结果
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningFailure {
    #[error("reasoner unreachable: {0}")]
    Unreachable(String),

    #[error("reasoner timed out after {0:?}")]
    Timeout(Duration),

    #[error("reasoner returned a malformed result: {0}")]
    Malformed(String),
}

/// 单次工具调用的失败，记录在 tool_result 载荷中而不是向上抛出
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool failed: {0}")]
    Failed(String),

    #[error("tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// 基础设施故障（协作方不可达）
    #[error("tool unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    /// 写入载荷的稳定类别名
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Failed(_) => "tool_error",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Unavailable(_) => "unavailable",
        }
    }

    /// 错误载荷：`{"error": {"kind": ..., "message": ...}}`
    pub fn to_payload(&self) -> String {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
        .to_string()
    }
}

/// 启动期注册冲突与查找失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// 检查点读写失败
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("checkpoint task failed: {0}")]
    Task(String),
}

/// 会话级操作（submit / resume）的失败
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Reasoning(#[from] ReasoningFailure),

    #[error("turn exceeded the limit of {max_cycles} tool cycles")]
    CycleLimitExceeded { max_cycles: usize },

    /// 内存中的日志仍反映本轮进度，但未保证落盘；若本轮已得出回答则一并带回
    #[error("checkpoint failed, progress is not durable: {source}")]
    Checkpoint {
        #[source]
        source: CheckpointError,
        answer: Option<String>,
    },

    /// 启动或恢复会话时读取检查点失败（此时内存中没有会话状态）
    #[error("failed to restore session: {0}")]
    Restore(#[source] CheckpointError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("session {0} has unanswered tool calls; resume it first")]
    TurnIncomplete(String),

    #[error("session {0} has no interrupted turn to resume")]
    NothingToResume(String),
}

impl OrchestratorError {
    /// 警告级错误：仅持久化失败
    pub fn is_warning(&self) -> bool {
        matches!(self, OrchestratorError::Checkpoint { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            OrchestratorError::Checkpoint { answer, .. } => answer.as_deref(),
            _ => None,
        }
    }
}
