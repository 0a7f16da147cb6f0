//! OpenAI 兼容 Chat Completions 客户端（函数调用）
//!
//! 直接通过 reqwest 调用 `{base_url}/chat/completions`；OpenAI、Gemini 的 OpenAI 兼容端点、
//! 自建代理均可。会话日志按角色映射：user → user，助手工具调用 → assistant.tool_calls，
//! tool_result → tool。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::memory::{Entry, Role, ToolCall};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            usage: TokenUsage::default(),
        })
    }

    fn build_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        messages.extend(request.messages.iter().map(to_wire_message));

        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn to_wire_message(entry: &Entry) -> Value {
    match entry.role {
        Role::User => json!({"role": "user", "content": entry.content}),
        Role::Assistant if entry.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": entry.content})
        }
        Role::Assistant => {
            let calls: Vec<Value> = entry
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": {
                            "name": c.tool_name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if entry.content.is_empty() {
                Value::Null
            } else {
                Value::String(entry.content.clone())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::ToolResult => json!({
            "role": "tool",
            "tool_call_id": entry.tool_call_id.clone().unwrap_or_default(),
            "content": entry.content,
        }),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_response(resp: ChatResponse) -> Result<Completion, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| {
            let arguments = if tc.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&tc.function.arguments).map_err(|e| {
                    LlmError::Malformed(format!(
                        "arguments of '{}' are not JSON: {}",
                        tc.function.name, e
                    ))
                })?
            };
            Ok(ToolCall::new(tc.id, tc.function.name, arguments))
        })
        .collect::<Result<Vec<_>, LlmError>>()?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(e.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let body = self.build_body(&request);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        parse_response(parsed)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client(base: &str) -> OpenAiClient {
        OpenAiClient::new(base, "gemini-2.5-flash", "test-key", 0.4, Duration::from_secs(5)).unwrap()
    }

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "detect_fire".into(),
            description: "detect".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }]
    }

    #[tokio::test]
    async fn test_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "detect_fire", "arguments": "{\"sector\":4}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let log = vec![Entry::user("status of sector 4")];
        let tools = tools();
        let out = c
            .complete(CompletionRequest {
                system: "be brief",
                messages: &log,
                tools: &tools,
            })
            .await
            .unwrap();
        assert!(out.content.is_empty());
        assert_eq!(out.tool_calls, vec![ToolCall::new("call_9", "detect_fire", json!({"sector": 4}))]);
        assert_eq!(c.token_usage(), (12, 3, 15));
    }

    #[tokio::test]
    async fn test_request_maps_roles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                let roles: Vec<String> = body["messages"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|m| m["role"].as_str().unwrap().to_string())
                    .collect();
                assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
                assert_eq!(body["messages"][3]["tool_call_id"], "c1");
                assert_eq!(body["tools"][0]["function"]["name"], "detect_fire");
                ResponseTemplate::new(200).set_body_json(json!({
                    "choices": [{"message": {"content": "All clear."}}]
                }))
            })
            .mount(&server)
            .await;

        let log = vec![
            Entry::user("q"),
            Entry::assistant_with_calls("", vec![ToolCall::new("c1", "detect_fire", json!({}))]),
            Entry::tool_result("c1", "[]"),
        ];
        let tools = tools();
        let out = client(&server.uri())
            .complete(CompletionRequest {
                system: "sys",
                messages: &log,
                tools: &tools,
            })
            .await
            .unwrap();
        assert_eq!(out.content, "All clear.");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;
        let err = client(&server.uri())
            .complete(CompletionRequest {
                system: "",
                messages: &[],
                tools: &[],
            })
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::RateLimited { retry_after_ms: Some(2000) });
    }

    #[test]
    fn test_unparseable_arguments_are_malformed() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "x", "function": {"name": "detect_fire", "arguments": "{not json"}}
            ]}}]
        }))
        .unwrap();
        assert!(matches!(parse_response(resp), Err(LlmError::Malformed(_))));
    }
}
