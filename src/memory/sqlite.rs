//! SQLite 检查点
//!
//! 单表 `checkpoints`，每个会话一行，entries 列保存完整日志的 JSON。
//! rusqlite 为同步接口，读写放进 spawn_blocking，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::CheckpointError;
use crate::memory::{CheckpointStore, Entry};

/// SQLite 持久化检查点
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CheckpointError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                entries TEXT NOT NULL,
                entry_count INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CheckpointError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| CheckpointError::Task(format!("connection lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Entry>, CheckpointError> {
        let session_id = session_id.to_string();
        let raw: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT entries FROM checkpoints WHERE session_id = ?1",
                        params![session_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, session_id: &str, entries: &[Entry]) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(entries)?;
        let count = entries.len() as i64;
        let session_id = session_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (session_id, entries, entry_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    entries = excluded.entries,
                    entry_count = excluded.entry_count,
                    updated_at = excluded.updated_at",
                params![session_id, json, count, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
