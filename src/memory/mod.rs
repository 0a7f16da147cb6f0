//! 记忆层：会话日志与检查点存储（内存 / JSON 文件 / SQLite）

pub mod checkpoint;
pub mod conversation;
pub mod persistence;
pub mod sqlite;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use conversation::{Entry, MessageLog, Role, ToolCall};
pub use persistence::JsonFileCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
