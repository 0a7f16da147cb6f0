//! 推理节点
//!
//! Reasoner 是单方法能力接口：给定完整日志，返回恰好一条助手条目（最终回答或工具调用）。
//! LlmReasoner 把任意 LlmClient 适配为 Reasoner；测试中可换成确定性桩实现。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ReasoningFailure;
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::memory::Entry;
use crate::tools::ToolDescriptor;

/// 内置 system prompt（可由配置文件覆盖）
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are FireWatch AI, a tactical operations assistant providing rapid decision support to first responders.

Tools:
- You have tools that return LIVE detection data. Call them whenever the user asks about a location, sector or image.

Confidence bands:
- HIGH (>80%): active emergency.
- MEDIUM: needs verification.
- LOW: keep monitoring.

Rules:
- Be concise; answer in bullet points.
- If a tool returns no data or an error, say \"No verified data.\" Never invent readings.
- Be action-oriented and suggest concrete deployments (e.g. \"Deploy drone to Sector 4\").";

/// 推理能力接口
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, log: &[Entry]) -> Result<Entry, ReasoningFailure>;
}

/// 基于 LLM 的推理节点
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    tools: Vec<ToolDescriptor>,
}

impl LlmReasoner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

impl From<LlmError> for ReasoningFailure {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Malformed(msg) => ReasoningFailure::Malformed(msg),
            other => ReasoningFailure::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn reason(&self, log: &[Entry]) -> Result<Entry, ReasoningFailure> {
        let completion = self
            .llm
            .complete(CompletionRequest {
                system: &self.system_prompt,
                messages: log,
                tools: &self.tools,
            })
            .await?;

        let (prompt, completion_tokens, _) = self.llm.token_usage();
        tracing::debug!(prompt, completion = completion_tokens, "LLM token usage");

        let mut seen = HashSet::new();
        let mut calls = completion.tool_calls;
        for call in &mut calls {
            if call.call_id.is_empty() {
                call.call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
            if !seen.insert(call.call_id.clone()) {
                return Err(ReasoningFailure::Malformed(format!(
                    "duplicate call_id '{}'",
                    call.call_id
                )));
            }
        }

        let entry = Entry::assistant_with_calls(completion.content, calls);
        entry.check_assistant_shape().map_err(ReasoningFailure::Malformed)?;
        Ok(entry)
    }
}
