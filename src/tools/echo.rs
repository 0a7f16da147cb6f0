//! Echo 工具（诊断用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{args_schema, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    text: String,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (diagnostics). Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<EchoArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let args: EchoArgs = serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
            tool: "echo".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Value::String(args.text))
    }
}
