//! 会话：session_id 与其只追加日志

use serde::Serialize;

use crate::core::TurnPhase;
use crate::memory::MessageLog;

/// 会话 ID（外部提供或首次使用时生成）
pub type SessionId = String;

/// 生成新的会话 ID
pub fn new_session_id() -> SessionId {
    format!("session_{}", uuid::Uuid::new_v4())
}

/// 单个会话，仅由编排器在持有会话锁时修改
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub log: MessageLog,
    /// 内存日志与最近一次落盘内容一致；只有这样的会话可以移出缓存
    pub durable: bool,
}

impl Session {
    /// 从检查点恢复的会话与存储一致
    pub fn new(id: impl Into<SessionId>, log: MessageLog) -> Self {
        Self {
            id: id.into(),
            log,
            durable: true,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id.clone(),
            entries: self.log.len(),
            phase: TurnPhase::resume_point(&self.log),
        }
    }
}

/// start_or_resume_session 返回给调用方的会话概况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub entries: usize,
    /// AwaitingInput 以外表示有中断的回合可 resume
    pub phase: TurnPhase,
}

impl SessionHandle {
    pub fn has_interrupted_turn(&self) -> bool {
        self.phase != TurnPhase::AwaitingInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Entry;

    #[test]
    fn test_new_session_ids_are_unique() {
        let a = new_session_id();
        assert!(a.starts_with("session_"));
        assert_ne!(a, new_session_id());
    }

    #[test]
    fn test_handle_reports_interrupted_turn() {
        let s = Session::new("s", MessageLog::restore(vec![Entry::user("q")]));
        let h = s.handle();
        assert_eq!(h.entries, 1);
        assert!(h.has_interrupted_turn());
    }
}
