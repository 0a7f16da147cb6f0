//! 编排器构建器：从配置组装工具注册表、推理节点与检查点存储
//!
//! CLI 与集成测试共用同一套组装逻辑。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{AppConfig, CheckpointBackend};
use crate::core::{Orchestrator, TurnLimits};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use crate::memory::{
    CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
use crate::react::{Dispatcher, LlmReasoner, Reasoner, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{EchoTool, HttpTool, ToolRegistry};

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
        }
    }

    /// 指定 LLM 客户端（跳过按配置选择）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定检查点存储（跳过按配置选择）
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 注册内置工具与 [[tools.http]]；重名是启动错误
    pub fn build_tool_registry(&self) -> anyhow::Result<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool)?;

        for entry in &self.config.tools.http {
            let tool = HttpTool::new(
                &entry.name,
                &entry.description,
                &entry.url,
                entry.parameters.clone(),
                entry.timeout_secs,
            )
            .with_context(|| format!("failed to build http tool '{}'", entry.name))?;
            tools.register(tool)?;
        }

        tracing::info!(tools = ?tools.tool_names(), "tool registry ready");
        Ok(tools)
    }

    /// 按 provider 与 API Key 选择 LLM，外层包一层有界重试
    pub fn build_llm(&self) -> anyhow::Result<Arc<dyn LlmClient>> {
        let inner = match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => create_llm_from_config(&self.config)?,
        };
        Ok(Arc::new(RetryingLlmClient::new(inner, self.retry_config())))
    }

    /// reasoner.timeout_secs 作用于每次尝试，而不是整个重试过程
    pub fn retry_config(&self) -> RetryConfig {
        let section = &self.config.reasoner;
        RetryConfig {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.retry_base_delay_ms),
            attempt_timeout: Some(Duration::from_secs(section.timeout_secs)),
        }
    }

    /// 系统提示词：配置文件指定则读取，否则用内置提示词
    pub fn load_system_prompt(&self) -> anyhow::Result<String> {
        match &self.config.app.system_prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read system prompt {}", path.display())),
            None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn build_store(&self) -> anyhow::Result<Arc<dyn CheckpointStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let section = &self.config.checkpoint;
        let path = section.resolved_path();
        let store: Arc<dyn CheckpointStore> = match section.backend {
            CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
            CheckpointBackend::Json => {
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                Arc::new(JsonFileCheckpointStore::new(&path))
            }
            CheckpointBackend::Sqlite => Arc::new(
                SqliteCheckpointStore::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            ),
        };
        tracing::info!(backend = store.name(), path = %display_path(section.backend, &path), "checkpoint store ready");
        Ok(store)
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        self.config.validate().context("invalid configuration")?;

        let tools = Arc::new(self.build_tool_registry()?);
        let reasoner: Arc<dyn Reasoner> = Arc::new(LlmReasoner::new(
            self.build_llm()?,
            self.load_system_prompt()?,
            tools.descriptors(),
        ));
        let orch = &self.config.orchestrator;
        let dispatcher = Dispatcher::new(
            Arc::clone(&tools),
            orch.tool_timeout_secs,
            orch.max_concurrent_tools,
        );
        // 推理总时限覆盖全部重试与退避等待
        let per_attempt = Duration::from_secs(self.config.reasoner.timeout_secs);
        let limits = TurnLimits {
            max_cycles: orch.max_cycles,
            reasoner_timeout: self.retry_config().worst_case_duration().unwrap_or(per_attempt),
        };

        Ok(Orchestrator::new(reasoner, dispatcher, self.build_store()?, limits)
            .with_session_cap(orch.max_cached_sessions))
    }
}

fn display_path(backend: CheckpointBackend, path: &Path) -> String {
    match backend {
        CheckpointBackend::Memory => "-".to_string(),
        _ => path.display().to_string(),
    }
}

/// provider = mock 或未设置 API Key 时使用 Mock
pub fn create_llm_from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let section = &config.reasoner;
    if section.provider == "mock" {
        return Ok(Arc::new(MockLlmClient));
    }

    let api_key = std::env::var(&section.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    match api_key {
        Some(key) => {
            let client = OpenAiClient::new(
                &section.base_url,
                &section.model,
                &key,
                section.temperature,
                Duration::from_secs(section.timeout_secs),
            )
            .context("failed to build reasoner http client")?;
            tracing::info!(model = %section.model, base_url = %section.base_url, "using OpenAI-compatible reasoner");
            Ok(Arc::new(client))
        }
        None => {
            tracing::warn!(
                env = %section.api_key_env,
                "API key not set, falling back to mock reasoner"
            );
            Ok(Arc::new(MockLlmClient))
        }
    }
}
