//! 核心编排层：错误分类、回合状态机、会话、编排器、构建器与优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod shutdown;
pub mod state;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{
    CheckpointError, OrchestratorError, ReasoningFailure, RegistryError, ToolError,
};
pub use orchestrator::{Orchestrator, TurnLimits};
pub use session::{new_session_id, Session, SessionHandle, SessionId};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::TurnPhase;
