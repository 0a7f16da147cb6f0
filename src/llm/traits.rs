//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：给定 system、会话日志与可用工具，
//! 返回一段文本或一组工具调用。RetryingLlmClient 为其加上有界重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{Entry, ToolCall};
use crate::tools::ToolDescriptor;

/// 一次补全请求
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Entry],
    pub tools: &'a [ToolDescriptor],
}

/// 补全结果：call_id 可能为空，由 Reasoner 补齐
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// 网络、超时、限流与 5xx 可重试；4xx 与解析失败不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Malformed(_) => false,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 服务端 Retry-After 的采纳上限
const RETRY_AFTER_CAP: Duration = Duration::from_secs(10);

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    /// 单次尝试超时；超时按 LlmError::Timeout 计入重试
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待（指数退避；限流时优先使用服务端给出的时间，最多 10 秒）
    fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after_ms: Some(ms),
        } = err
        {
            return Duration::from_millis(*ms).min(RETRY_AFTER_CAP);
        }
        self.backoff(attempt)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// 含全部重试与等待的最长耗时；未设置单次超时时无上界
    pub fn worst_case_duration(&self) -> Option<Duration> {
        let per_attempt = self.attempt_timeout?;
        let waits: Duration = (0..self.max_retries)
            .map(|attempt| self.backoff(attempt).max(RETRY_AFTER_CAP))
            .sum();
        Some(per_attempt * (self.max_retries + 1) + waits)
    }
}

/// 有界重试包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let mut attempt = 0;
        loop {
            let result = match self.config.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, self.inner.complete(request))
                    .await
                    .unwrap_or(Err(LlmError::Timeout)),
                None => self.inner.complete(request).await,
            };
            match result {
                Ok(c) => return Ok(c),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt, &e);
                    tracing::warn!(attempt = attempt + 1, ?delay, error = %e, "LLM call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
