//! 回合状态机
//!
//! AwaitingInput → Reasoning → Routing → {Dispatching → Reasoning | Terminated}；
//! Terminated 之后会话回到 AwaitingInput。resume_point 从持久化日志推导中断位置。

use serde::Serialize;

use crate::memory::{MessageLog, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingInput,
    Reasoning,
    Routing,
    Dispatching,
    Terminated,
}

impl TurnPhase {
    /// 日志停在哪一步：
    /// 空日志或最终回答 → AwaitingInput；
    /// 末尾是用户条目或已全部回答的工具结果 → Reasoning；
    /// 末尾的工具调用尚有未回答的调用 → Dispatching
    pub fn resume_point(log: &MessageLog) -> TurnPhase {
        let Some(last) = log.last() else {
            return TurnPhase::AwaitingInput;
        };
        if !log.unanswered_calls().is_empty() {
            return TurnPhase::Dispatching;
        }
        match last.role {
            Role::User | Role::ToolResult => TurnPhase::Reasoning,
            Role::Assistant => TurnPhase::AwaitingInput,
        }
    }
}
