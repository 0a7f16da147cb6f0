//! 检查点存储抽象
//!
//! 每个 session_id 一条记录，保存完整日志；load 不存在时返回空日志，save 幂等。
//! 内存实现与持久化实现（JSON 文件 / SQLite）可互换，编排器无需改动。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::CheckpointError;
use crate::memory::Entry;

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 读取会话日志；没有记录时返回空 Vec
    async fn load(&self, session_id: &str) -> Result<Vec<Entry>, CheckpointError>;

    /// 以完整日志覆盖会话记录
    async fn save(&self, session_id: &str, entries: &[Entry]) -> Result<(), CheckpointError>;

    /// 存储名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 内存检查点：进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Vec<Entry>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Entry>, CheckpointError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, entries: &[Entry]) -> Result<(), CheckpointError> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), entries.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
