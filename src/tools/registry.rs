//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / invoke），
//! 启动时由 ToolRegistry 按名注册，之后只读，可在多个会话间无锁共享。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{RegistryError, ToolError};

/// 工具 trait：外部协作方的统一调用约定
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（推理节点发出的 tool_name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具：参数已通过 schema 校验
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// 工具描述符：名称、描述与参数 schema，供推理节点声明可用工具
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名重复注册返回 DuplicateTool（启动期致命错误）
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按名称排序的描述符列表（顺序稳定，便于复现请求）
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolDescriptor {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn invoke(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.lookup("detect_fire"),
            Err(RegistryError::UnknownTool(name)) if name == "detect_fire"
        ));
    }

    #[test]
    fn test_descriptors_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("ocr")).unwrap();
        registry.register(NamedTool("detect")).unwrap();
        registry.register(NamedTool("remove_bg")).unwrap();
        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["detect", "ocr", "remove_bg"]);
        assert_eq!(registry.descriptors()[0].parameters["type"], "object");
    }
}
