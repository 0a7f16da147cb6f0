//! JSON 文件检查点
//!
//! 每个会话一个 `.json` 文件，内容为完整 Entry 数组。
//! 文件名由 session_id 百分号编码得到（`.` 也编码），任意 ID 都映射为安全且唯一的文件名；
//! 编码后过长的名称按段拆成子目录。
//! 写入先落到临时文件再 rename，避免崩溃时留下半截记录。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::CheckpointError;
use crate::memory::{CheckpointStore, Entry};

/// 单个路径段的最大字节数（低于常见文件系统 255 字节的限制）
const MAX_SEGMENT_BYTES: usize = 128;

/// 目录型文件持久化
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let encoded = encode_session_id(session_id);
        let mut path = self.dir.clone();
        let mut rest = encoded.as_str();
        while rest.len() > MAX_SEGMENT_BYTES {
            let (segment, tail) = rest.split_at(MAX_SEGMENT_BYTES);
            path.push(segment);
            rest = tail;
        }
        path.push(format!("{rest}.json"));
        path
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    /// 文件不存在时返回空日志
    async fn load(&self, session_id: &str) -> Result<Vec<Entry>, CheckpointError> {
        let path = self.path_for(session_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// 父目录不存在时自动创建
    async fn save(&self, session_id: &str, entries: &[Entry]) -> Result<(), CheckpointError> {
        let path = self.path_for(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(entries)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(session_id, entries = entries.len(), path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// 编码结果只含 `[A-Za-z0-9_~%-]`：不含路径分隔符，也不会出现 `.` / `..` 段
fn encode_session_id(session_id: &str) -> String {
    urlencoding::encode(session_id).replace('.', "%2E")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use tempfile::TempDir;

    fn sample_log() -> Vec<Entry> {
        vec![
            Entry::user("status of sector 4"),
            Entry::assistant_with_calls(
                "checking",
                vec![ToolCall::new(
                    "call_1",
                    "detect_fire",
                    serde_json::json!({"sector": 4}),
                )],
            ),
            Entry::tool_result("call_1", r#"{"labels":["smoke"],"confidence":0.9}"#),
            Entry::assistant("Active emergency detected in sector 4."),
        ]
    }

    #[tokio::test]
    async fn test_json_store_round_trip_and_idempotence() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("nested"));

        assert!(store.load("s1").await.unwrap().is_empty());

        let log = sample_log();
        store.save("s1", &log).await.unwrap();
        let first = std::fs::read_to_string(dir.path().join("nested/s1.json")).unwrap();
        store.save("s1", &log).await.unwrap();
        let second = std::fs::read_to_string(dir.path().join("nested/s1.json")).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.load("s1").await.unwrap(), log);
    }

    #[tokio::test]
    async fn test_json_store_keeps_path_escape_inside_dir() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("checkpoints");
        let store = JsonFileCheckpointStore::new(&dir);

        for id in ["../outside", "..", ".", "a/b", ""] {
            store.save(id, &sample_log()).await.unwrap();
            assert_eq!(store.load(id).await.unwrap(), sample_log(), "id {id:?}");
        }
        assert!(!root.path().join("outside.json").exists());
        let escaped: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(escaped, vec![std::ffi::OsString::from("checkpoints")]);
    }

    #[tokio::test]
    async fn test_json_store_accepts_opaque_session_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        let long_id = "crew-7/".repeat(60);

        for id in ["ops@station-4", "engine 12 / ladder 3", "分队-4", long_id.as_str()] {
            store.save(id, &sample_log()).await.unwrap();
            assert_eq!(store.load(id).await.unwrap(), sample_log(), "id {id:?}");
        }
        assert!(dir.path().join("ops%40station-4.json").exists());
        // 编码不同的 ID 互不覆盖
        assert!(store.load("ops%40station-4").await.unwrap().is_empty());
        assert!(store.load("ops@station-4 ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "not json").unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(CheckpointError::Serialization(_))
        ));
    }
}
