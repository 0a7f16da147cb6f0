//! 编排器：回合主循环
//!
//! 持有推理节点、工具调度器与检查点存储，按会话维护只追加日志，
//! 驱动 Reasoning → Routing → {Dispatching → Reasoning | Terminated}。
//! 同一会话的回合由会话锁串行化；不同会话互不影响，可并行执行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::session::{new_session_id, Session, SessionHandle, SessionId};
use crate::core::{OrchestratorError, ReasoningFailure, TurnPhase};
use crate::memory::{CheckpointStore, Entry, MessageLog};
use crate::react::{route, Dispatcher, Reasoner, Route, TurnEvent};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 默认缓存的会话数上限
pub const DEFAULT_MAX_CACHED_SESSIONS: usize = 1024;

/// 单轮约束
#[derive(Debug, Clone)]
pub struct TurnLimits {
    /// 每轮最多执行的工具调度次数
    pub max_cycles: usize,
    /// 单次推理调用超时
    pub reasoner_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_cycles: 8,
            reasoner_timeout: Duration::from_secs(60),
        }
    }
}

/// 会话级编排器
pub struct Orchestrator {
    reasoner: Arc<dyn Reasoner>,
    dispatcher: Dispatcher,
    store: Arc<dyn CheckpointStore>,
    limits: TurnLimits,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    /// 达到上限时移出空闲且已落盘的会话，之后按需从检查点重新加载
    max_cached_sessions: usize,
    event_tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        dispatcher: Dispatcher,
        store: Arc<dyn CheckpointStore>,
        limits: TurnLimits,
    ) -> Self {
        Self {
            reasoner,
            dispatcher,
            store,
            limits,
            sessions: RwLock::new(HashMap::new()),
            max_cached_sessions: DEFAULT_MAX_CACHED_SESSIONS,
            event_tx: None,
        }
    }

    pub fn with_session_cap(mut self, max_cached_sessions: usize) -> Self {
        self.max_cached_sessions = max_cached_sessions.max(1);
        self
    }

    /// 设置事件推送通道
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 生成新的会话 ID；会话在首次使用时创建
    pub fn new_session(&self) -> SessionId {
        new_session_id()
    }

    /// 从检查点加载会话，没有记录时创建空会话
    pub async fn start_or_resume_session(
        &self,
        session_id: &str,
    ) -> Result<SessionHandle, OrchestratorError> {
        let session = self.session(session_id).await?;
        let guard = session.lock().await;
        Ok(guard.handle())
    }

    /// 运行一轮：追加用户条目并循环到最终回答
    pub async fn submit(&self, session_id: &str, user_text: &str) -> Result<String, OrchestratorError> {
        self.submit_with_cancel(session_id, user_text, CancellationToken::new())
            .await
    }

    /// 可取消的 submit：推理中取消立即放弃未提交条目；工具调度中取消会等调度完成并写入检查点
    pub async fn submit_with_cancel(
        &self,
        session_id: &str,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        if !session.log.unanswered_calls().is_empty() {
            return Err(OrchestratorError::TurnIncomplete(session.id.clone()));
        }

        tracing::info!(session_id = %session.id, entries = session.log.len(), "turn started");
        session.log.append(Entry::user(user_text));
        self.drive(&mut session, TurnPhase::Reasoning, &cancel).await
    }

    /// 从日志的中断位置继续上一轮（例如崩溃发生在调度检查点之后），不会重复已完成的工具调用
    pub async fn resume(&self, session_id: &str) -> Result<String, OrchestratorError> {
        self.resume_with_cancel(session_id, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        let phase = TurnPhase::resume_point(&session.log);
        if phase == TurnPhase::AwaitingInput {
            return Err(OrchestratorError::NothingToResume(session.id.clone()));
        }
        tracing::info!(session_id = %session.id, ?phase, "resuming interrupted turn");
        self.drive(&mut session, phase, &cancel).await
    }

    /// 会话日志快照
    pub async fn history(&self, session_id: &str) -> Result<Vec<Entry>, OrchestratorError> {
        let session = self.session(session_id).await?;
        let guard = session.lock().await;
        Ok(guard.log.entries().to_vec())
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, OrchestratorError> {
        if let Some(s) = self.sessions.read().await.get(session_id) {
            return Ok(Arc::clone(s));
        }

        let entries = self
            .store
            .load(session_id)
            .await
            .map_err(OrchestratorError::Restore)?;

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) && sessions.len() >= self.max_cached_sessions {
            evict_idle(&mut sessions);
        }
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::info!(
                session_id,
                store = self.store.name(),
                entries = entries.len(),
                "session loaded"
            );
            Arc::new(Mutex::new(Session::new(session_id, MessageLog::restore(entries))))
        });
        Ok(Arc::clone(session))
    }

    /// 驱动状态机；失败时丢弃未提交条目（持久化告警除外）
    async fn drive(
        &self,
        session: &mut Session,
        phase: TurnPhase,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let result = self.run_phases(session, phase, cancel).await;
        match &result {
            Ok(_) => tracing::info!(session_id = %session.id, entries = session.log.len(), "turn finished"),
            Err(e) if e.is_warning() => {
                tracing::warn!(session_id = %session.id, error = %e, "turn finished without durable checkpoint");
            }
            Err(e) => {
                let dropped = session.log.discard_uncommitted();
                tracing::warn!(session_id = %session.id, error = %e, dropped, "turn aborted");
                self.emit(TurnEvent::Failed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_phases(
        &self,
        session: &mut Session,
        mut phase: TurnPhase,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        loop {
            phase = match phase {
                TurnPhase::Reasoning => {
                    let cycle = session.log.cycles_since_last_user();
                    tracing::debug!(session_id = %session.id, cycle, "reasoning");
                    self.emit(TurnEvent::CycleStarted {
                        session_id: session.id.clone(),
                        cycle,
                    });
                    let entry = self.reason(session, cancel).await?;
                    session.log.append(entry);
                    TurnPhase::Routing
                }
                TurnPhase::Routing => match session.log.last().map(route) {
                    Some(Route::Dispatch) => TurnPhase::Dispatching,
                    _ => TurnPhase::Terminated,
                },
                TurnPhase::Dispatching => {
                    if session.log.cycles_since_last_user() > self.limits.max_cycles {
                        return Err(OrchestratorError::CycleLimitExceeded {
                            max_cycles: self.limits.max_cycles,
                        });
                    }
                    self.dispatch(session).await?;
                    // 调度已落盘，此时响应取消不会留下未回答的调用
                    if cancel.is_cancelled() {
                        return Err(OrchestratorError::Cancelled);
                    }
                    TurnPhase::Reasoning
                }
                TurnPhase::Terminated => {
                    let answer = session
                        .log
                        .last()
                        .map(|e| e.content.clone())
                        .unwrap_or_default();
                    self.checkpoint(session, Some(&answer)).await?;
                    self.emit(TurnEvent::Answer {
                        text: answer.clone(),
                    });
                    return Ok(answer);
                }
                TurnPhase::AwaitingInput => {
                    return Err(OrchestratorError::NothingToResume(session.id.clone()));
                }
            };
        }
    }

    async fn reason(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Entry, OrchestratorError> {
        let limit = self.limits.reasoner_timeout;
        let call = timeout(limit, self.reasoner.reason(session.log.entries()));
        let entry = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            res = call => match res {
                Ok(result) => result?,
                Err(_) => return Err(ReasoningFailure::Timeout(limit).into()),
            },
        };
        entry
            .check_assistant_shape()
            .map_err(ReasoningFailure::Malformed)?;
        Ok(entry)
    }

    /// 执行最后一条助手条目中未回答的调用，按调用顺序追加结果并写入检查点
    async fn dispatch(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        let calls = session.log.unanswered_calls();
        for call in &calls {
            self.emit(TurnEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        let results = self.dispatcher.dispatch(&calls).await;
        for (call, result) in calls.iter().zip(results) {
            self.emit(TurnEvent::ToolResult {
                call_id: call.call_id.clone(),
                tool: call.tool_name.clone(),
                is_error: result.is_error,
                preview: result.content.chars().take(RESULT_PREVIEW_CHARS).collect(),
            });
            session.log.append(result);
        }
        self.checkpoint(session, None).await
    }

    async fn checkpoint(
        &self,
        session: &mut Session,
        answer: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let saved = self.store.save(&session.id, session.log.entries()).await;
        // 无论是否落盘，内存日志都保留本轮进度
        session.log.mark_committed();
        session.durable = saved.is_ok();
        match saved {
            Ok(()) => {
                tracing::debug!(session_id = %session.id, entries = session.log.len(), "checkpointed");
                self.emit(TurnEvent::Checkpointed {
                    entries: session.log.len(),
                });
                Ok(())
            }
            Err(source) => Err(OrchestratorError::Checkpoint {
                source,
                answer: answer.map(str::to_string),
            }),
        }
    }

    fn emit(&self, ev: TurnEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 移出无人持有且已落盘的会话；未落盘的会话只存在于内存，必须保留
fn evict_idle(sessions: &mut HashMap<SessionId, Arc<Mutex<Session>>>) {
    let before = sessions.len();
    sessions.retain(|_, s| {
        let idle = Arc::strong_count(s) == 1;
        !(idle && s.try_lock().map(|g| g.durable).unwrap_or(false))
    });
    let evicted = before - sessions.len();
    if evicted == 0 {
        tracing::warn!(cached = before, "session cache full, nothing evictable");
    } else {
        tracing::debug!(evicted, cached = sessions.len(), "evicted idle sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CheckpointError, ToolError};
    use crate::memory::{MemoryCheckpointStore, Role, ToolCall};
    use crate::tools::{EchoTool, Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// 按脚本依次返回结果的推理桩
    struct ScriptedReasoner {
        script: StdMutex<VecDeque<Result<Entry, ReasoningFailure>>>,
    }

    impl ScriptedReasoner {
        fn new(script: Vec<Result<Entry, ReasoningFailure>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn reason(&self, _log: &[Entry]) -> Result<Entry, ReasoningFailure> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ReasoningFailure::Unreachable("script exhausted".into())))
        }
    }

    struct HangingReasoner;

    #[async_trait]
    impl Reasoner for HangingReasoner {
        async fn reason(&self, _log: &[Entry]) -> Result<Entry, ReasoningFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Entry::assistant("never"))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        async fn load(&self, _id: &str) -> Result<Vec<Entry>, CheckpointError> {
            Ok(Vec::new())
        }

        async fn save(&self, _id: &str, _entries: &[Entry]) -> Result<(), CheckpointError> {
            Err(CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn echo_call(id: &str) -> Entry {
        Entry::assistant_with_calls(
            "",
            vec![ToolCall::new(id, "echo", serde_json::json!({"text": id}))],
        )
    }

    fn orchestrator(
        reasoner: Arc<dyn Reasoner>,
        store: Arc<dyn CheckpointStore>,
        limits: TurnLimits,
    ) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        Orchestrator::new(reasoner, Dispatcher::new(Arc::new(registry), 5, 2), store, limits)
    }

    #[tokio::test]
    async fn test_reasoning_failure_leaves_log_unchanged() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            Ok(Entry::assistant("first answer")),
            Err(ReasoningFailure::Unreachable("503".into())),
        ]);
        let orch = orchestrator(reasoner, store.clone(), TurnLimits::default());

        assert_eq!(orch.submit("s", "hello").await.unwrap(), "first answer");
        let err = orch.submit("s", "again").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Reasoning(_)));
        assert!(!err.is_warning());

        let history = orch.history("s").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(store.load("s").await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_malformed_assistant_entry_is_rejected() {
        let reasoner = ScriptedReasoner::new(vec![Ok(Entry::assistant(""))]);
        let orch = orchestrator(
            reasoner,
            Arc::new(MemoryCheckpointStore::new()),
            TurnLimits::default(),
        );
        let err = orch.submit("s", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Reasoning(ReasoningFailure::Malformed(_))
        ));
        assert!(orch.history("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reasoner_timeout() {
        let limits = TurnLimits {
            max_cycles: 3,
            reasoner_timeout: Duration::from_millis(20),
        };
        let orch = orchestrator(
            Arc::new(HangingReasoner),
            Arc::new(MemoryCheckpointStore::new()),
            limits,
        );
        let err = orch.submit("s", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Reasoning(ReasoningFailure::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_reasoning_discards_turn() {
        let orch = orchestrator(
            Arc::new(HangingReasoner),
            Arc::new(MemoryCheckpointStore::new()),
            TurnLimits::default(),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = orch.submit_with_cancel("s", "hi", token).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(orch.history("s").await.unwrap().is_empty());
    }

    /// 执行时触发取消的工具
    struct CancellingTool(CancellationToken);

    #[async_trait]
    impl Tool for CancellingTool {
        fn name(&self) -> &str {
            "alarm"
        }

        fn description(&self) -> &str {
            "cancels the turn while running"
        }

        async fn invoke(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            self.0.cancel();
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(serde_json::json!({"status": "sounded"}))
        }
    }

    #[tokio::test]
    async fn test_cancel_is_deferred_until_dispatch_is_checkpointed() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let token = CancellationToken::new();
        let mut registry = ToolRegistry::new();
        registry.register(CancellingTool(token.clone())).unwrap();
        let reasoner = ScriptedReasoner::new(vec![
            Ok(Entry::assistant_with_calls(
                "",
                vec![ToolCall::new("c1", "alarm", serde_json::json!({}))],
            )),
            Ok(Entry::assistant("resumed answer")),
        ]);
        let orch = Orchestrator::new(
            reasoner,
            Dispatcher::new(Arc::new(registry), 5, 2),
            store.clone(),
            TurnLimits::default(),
        );

        let err = orch.submit_with_cancel("s", "q", token).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));

        // 调度完整执行并落盘，没有留下未回答的调用
        let saved = store.load("s").await.unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[2].role, Role::ToolResult);
        assert!(!saved[2].is_error);
        assert_eq!(orch.history("s").await.unwrap(), saved);

        assert_eq!(orch.resume("s").await.unwrap(), "resumed answer");
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_warning_with_answer() {
        let reasoner = ScriptedReasoner::new(vec![Ok(Entry::assistant("answer"))]);
        let orch = orchestrator(reasoner, Arc::new(BrokenStore), TurnLimits::default());
        let err = orch.submit("s", "q").await.unwrap_err();
        assert!(err.is_warning());
        assert_eq!(err.answer(), Some("answer"));
        // 内存日志仍保留本轮进度
        assert_eq!(orch.history("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_without_interrupted_turn() {
        let reasoner = ScriptedReasoner::new(vec![Ok(Entry::assistant("a"))]);
        let orch = orchestrator(
            reasoner,
            Arc::new(MemoryCheckpointStore::new()),
            TurnLimits::default(),
        );
        assert!(matches!(
            orch.resume("s").await,
            Err(OrchestratorError::NothingToResume(_))
        ));
        orch.submit("s", "q").await.unwrap();
        assert!(matches!(
            orch.resume("s").await,
            Err(OrchestratorError::NothingToResume(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_rejected_while_calls_unanswered() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store
            .save("s", &[Entry::user("q"), echo_call("c1")])
            .await
            .unwrap();
        let reasoner = ScriptedReasoner::new(vec![Ok(Entry::assistant("done"))]);
        let orch = orchestrator(reasoner, store.clone(), TurnLimits::default());

        let handle = orch.start_or_resume_session("s").await.unwrap();
        assert_eq!(handle.phase, TurnPhase::Dispatching);
        assert!(matches!(
            orch.submit("s", "new question").await,
            Err(OrchestratorError::TurnIncomplete(_))
        ));

        // resume 只执行未回答的调用
        assert_eq!(orch.resume("s").await.unwrap(), "done");
        let saved = store.load("s").await.unwrap();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(saved[2].content, "c1");
    }

    #[tokio::test]
    async fn test_events_follow_turn() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reasoner = ScriptedReasoner::new(vec![
            Ok(echo_call("c1")),
            Ok(Entry::assistant("done")),
        ]);
        let orch = orchestrator(
            reasoner,
            Arc::new(MemoryCheckpointStore::new()),
            TurnLimits::default(),
        )
        .with_events(tx);
        orch.submit("s", "q").await.unwrap();
        drop(orch);

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(matches!(events[0], TurnEvent::CycleStarted { cycle: 0, .. }));
        assert!(matches!(events[1], TurnEvent::ToolCall { .. }));
        assert!(matches!(events[2], TurnEvent::ToolResult { is_error: false, .. }));
        assert_eq!(events[3], TurnEvent::Checkpointed { entries: 3 });
        assert!(matches!(events[4], TurnEvent::CycleStarted { cycle: 1, .. }));
        assert_eq!(events[5], TurnEvent::Checkpointed { entries: 4 });
        assert_eq!(events[6], TurnEvent::Answer { text: "done".into() });
    }

    #[tokio::test]
    async fn test_dispatch_checkpoint_failure_keeps_tool_results() {
        let reasoner = ScriptedReasoner::new(vec![
            Ok(echo_call("c1")),
            Ok(Entry::assistant("done")),
        ]);
        let orch = orchestrator(reasoner, Arc::new(BrokenStore), TurnLimits::default());

        // 调度检查点失败：回合在此停止，没有最终回答
        let err = orch.submit("s", "q").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Checkpoint { .. }));
        assert!(err.is_warning());
        assert_eq!(err.answer(), None);

        let history = orch.history("s").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].role, Role::ToolResult);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));

        // 工具结果留在内存里，resume 直接回到推理
        let err = orch.resume("s").await.unwrap_err();
        assert!(err.is_warning());
        assert_eq!(err.answer(), Some("done"));
        assert_eq!(orch.history("s").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_session_cache_is_capped() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            Ok(Entry::assistant("a1")),
            Ok(Entry::assistant("a2")),
            Ok(Entry::assistant("a3")),
        ]);
        let orch =
            orchestrator(reasoner, store.clone(), TurnLimits::default()).with_session_cap(2);

        orch.submit("s1", "q1").await.unwrap();
        orch.submit("s2", "q2").await.unwrap();
        orch.submit("s3", "q3").await.unwrap();
        assert!(orch.sessions.read().await.len() <= 2);

        // 被移出的会话从检查点重新加载
        let history = orch.history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "a1");
    }

    #[tokio::test]
    async fn test_unsaved_session_is_never_evicted() {
        let reasoner = ScriptedReasoner::new(vec![
            Ok(Entry::assistant("a1")),
            Ok(Entry::assistant("a2")),
        ]);
        let orch = orchestrator(reasoner, Arc::new(BrokenStore), TurnLimits::default())
            .with_session_cap(1);

        assert!(orch.submit("s1", "q1").await.unwrap_err().is_warning());
        assert!(orch.submit("s2", "q2").await.unwrap_err().is_warning());
        assert_eq!(orch.sessions.read().await.len(), 2);
        // s1 只在内存中，历史仍完整
        assert_eq!(orch.history("s1").await.unwrap().len(), 2);
    }
}
