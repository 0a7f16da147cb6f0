//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FIREWATCH__*` 覆盖
//! （双下划线表示嵌套，如 `FIREWATCH__ORCHESTRATOR__MAX_CYCLES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub reasoner: ReasonerSection,
    pub orchestrator: OrchestratorSection,
    pub checkpoint: CheckpointSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、系统提示词文件
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 覆盖内置系统提示词的文件
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            system_prompt_path: None,
        }
    }
}

fn default_app_name() -> String {
    "FireWatch AI".to_string()
}

/// [reasoner] 段：推理后端（OpenAI 兼容接口）与重试
#[derive(Debug, Clone, Deserialize)]
pub struct ReasonerSection {
    /// openai / mock；未设置 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 存放 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 单次推理调用超时（秒）
    #[serde(default = "default_reasoner_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReasonerSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_reasoner_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_reasoner_timeout_secs() -> u64 {
    60
}

/// [orchestrator] 段：单轮约束与工具调度
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 每轮最多的工具调度次数
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 内存中缓存的会话数上限
    #[serde(default = "default_max_cached_sessions")]
    pub max_cached_sessions: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            max_concurrent_tools: default_max_concurrent_tools(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_cached_sessions: default_max_cached_sessions(),
        }
    }
}

fn default_max_cycles() -> usize {
    8
}

fn default_max_concurrent_tools() -> usize {
    3
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_cached_sessions() -> usize {
    1024
}

/// 检查点后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    Json,
    Sqlite,
}

/// [checkpoint] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckpointSection {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// json 为目录，sqlite 为数据库文件
    pub path: Option<PathBuf>,
}

impl CheckpointSection {
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(p), _) => p.clone(),
            (None, CheckpointBackend::Sqlite) => PathBuf::from("data/checkpoints.db"),
            (None, _) => PathBuf::from("data/checkpoints"),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    #[serde(default)]
    pub http: Vec<HttpToolEntry>,
}

/// [[tools.http]]：通过 HTTP 接入的外部服务（检测、抠图、OCR 等）
#[derive(Debug, Clone, Deserialize)]
pub struct HttpToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    /// 参数 JSON Schema
    #[serde(default = "default_http_parameters")]
    pub parameters: serde_json::Value,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_parameters() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl AppConfig {
    /// 启动期校验：零值与空名称/URL 视为配置错误
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: String| Err(config::ConfigError::Message(msg));

        if self.orchestrator.max_cycles == 0 {
            return invalid("orchestrator.max_cycles must be at least 1".into());
        }
        if self.orchestrator.max_concurrent_tools == 0 {
            return invalid("orchestrator.max_concurrent_tools must be at least 1".into());
        }
        if self.orchestrator.max_cached_sessions == 0 {
            return invalid("orchestrator.max_cached_sessions must be at least 1".into());
        }
        if self.orchestrator.tool_timeout_secs == 0 {
            return invalid("orchestrator.tool_timeout_secs must be positive".into());
        }
        if self.reasoner.timeout_secs == 0 {
            return invalid("reasoner.timeout_secs must be positive".into());
        }
        for entry in &self.tools.http {
            if entry.name.trim().is_empty() {
                return invalid("tools.http entry has an empty name".into());
            }
            if entry.url.trim().is_empty() {
                return invalid(format!("tools.http '{}' has an empty url", entry.name));
            }
            if entry.timeout_secs == 0 {
                return invalid(format!("tools.http '{}' timeout_secs must be positive", entry.name));
            }
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 FIREWATCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FIREWATCH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FIREWATCH")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(src: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(src, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_toml("");
        assert_eq!(cfg.app.name, "FireWatch AI");
        assert_eq!(cfg.reasoner.model, "gemini-2.5-flash");
        assert_eq!(cfg.reasoner.max_retries, 2);
        assert_eq!(cfg.orchestrator.max_cycles, 8);
        assert_eq!(cfg.orchestrator.max_cached_sessions, 1024);
        assert_eq!(cfg.checkpoint.backend, CheckpointBackend::Memory);
        assert!(cfg.tools.http.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sections_and_http_tools() {
        let cfg = from_toml(
            r#"
            [orchestrator]
            max_cycles = 5

            [checkpoint]
            backend = "sqlite"

            [[tools.http]]
            name = "detect_objects"
            description = "Run fire/smoke detection on an image"
            url = "http://localhost:8001/detect"
            timeout_secs = 10

            [tools.http.parameters]
            type = "object"
            required = ["image_url"]

            [tools.http.parameters.properties.image_url]
            type = "string"
            "#,
        );
        assert_eq!(cfg.orchestrator.max_cycles, 5);
        assert_eq!(cfg.orchestrator.max_concurrent_tools, 3);
        assert_eq!(cfg.checkpoint.resolved_path(), PathBuf::from("data/checkpoints.db"));

        let tool = &cfg.tools.http[0];
        assert_eq!(tool.name, "detect_objects");
        assert_eq!(tool.timeout_secs, 10);
        assert_eq!(tool.parameters["required"][0], "image_url");
        assert_eq!(tool.parameters["properties"]["image_url"]["type"], "string");
    }

    #[test]
    fn test_validate_rejects_zero_and_empty_values() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.max_cycles = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.orchestrator.max_cached_sessions = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.tools.http.push(HttpToolEntry {
            name: "ocr".into(),
            description: String::new(),
            url: " ".into(),
            parameters: default_http_parameters(),
            timeout_secs: 30,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_backend_default_path() {
        let section = CheckpointSection {
            backend: CheckpointBackend::Json,
            path: None,
        };
        assert_eq!(section.resolved_path(), PathBuf::from("data/checkpoints"));
    }
}
