//! HTTP 协作方工具：把工具调用转发给远端服务
//!
//! 检测、去背景、OCR 等能力由外部服务提供；参数以 JSON POST 到配置的 URL，
//! 响应 JSON（或纯文本）即为工具输出。连接失败归为 Unavailable（基础设施），
//! 非 2xx 状态归为 Failed（语义错误），两者都只会成为 tool_result 载荷。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::Tool;

/// 错误响应体保留的最大字符数
const MAX_ERROR_BODY_CHARS: usize = 500;

/// 远端 HTTP 工具
pub struct HttpTool {
    name: String,
    description: String,
    url: String,
    parameters: Value,
    client: Client,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        parameters: Value,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("firewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            parameters,
            client,
        })
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let response = self
            .client
            .post(&self.url)
            .json(&args)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Unavailable(format!("reading response: {e}")))?;

        if !status.is_success() {
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(ToolError::Failed(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
