//! FireWatch - 面向一线救援人员的战术助手编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合状态机、编排器、会话、错误分类、构建器与优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与有界重试
//! - **memory**: 会话日志与检查点存储（内存 / JSON 文件 / SQLite）
//! - **observability**: tracing 初始化
//! - **react**: 推理节点、路由、工具调度与过程事件
//! - **tools**: 工具注册表、参数校验与内置工具（echo、HTTP 外部服务）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
