//! Mock LLM 客户端（无需 API）
//!
//! 取最后一条 User 消息原样回显为最终回答，不发起工具调用；未配置 API Key 时的默认后端。

use async_trait::async_trait;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(Completion {
            content: format!("Echo from Mock: {last_user}"),
            tool_calls: Vec::new(),
        })
    }
}
