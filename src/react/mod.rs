//! 图节点：推理（Reasoner）、路由（Router）、工具调度（Dispatcher）与过程事件

pub mod dispatch;
pub mod events;
pub mod reasoner;
pub mod router;

pub use dispatch::Dispatcher;
pub use events::TurnEvent;
pub use reasoner::{LlmReasoner, Reasoner, DEFAULT_SYSTEM_PROMPT};
pub use router::{route, Route};
