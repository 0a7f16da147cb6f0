//! 调度节点：执行一条助手条目中的全部工具调用
//!
//! 同一条目内的调用可并发执行（Semaphore 限制并发数），结果按原调用顺序返回。
//! 未知工具、参数校验失败、工具报错、超时都转为带错误载荷的 tool_result，不会中断本轮；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::memory::{Entry, ToolCall};
use crate::tools::{validate_arguments, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具调度器：持有只读注册表、单次调用超时与并发上限
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64, max_concurrent: usize) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 每个调用恰好产生一条 tool_result，顺序与 calls 一致（与完成先后无关）
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Entry> {
        join_all(calls.iter().map(|call| self.run_one(call))).await
    }

    async fn run_one(&self, call: &ToolCall) -> Entry {
        // 信号量从不关闭
        let _permit = self.permits.acquire().await.ok();
        let start = Instant::now();
        let result = self.invoke(call).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool_name,
            "call_id": call.call_id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(output) => Entry::tool_result(&call.call_id, render_output(output)),
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "tool call failed");
                Entry::tool_error(&call.call_id, e.to_payload())
            }
        }
    }

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .lookup(&call.tool_name)
            .map_err(|_| ToolError::UnknownTool(call.tool_name.clone()))?;

        validate_arguments(&call.arguments, &tool.parameters_schema()).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: call.tool_name.clone(),
                reason,
            }
        })?;

        match timeout(self.timeout, tool.invoke(call.arguments.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: call.tool_name.clone(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// 字符串输出原样写入，其余输出序列化为 JSON
fn render_output(output: Value) -> String {
    match output {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
