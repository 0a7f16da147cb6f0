//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! 强类型参数结构体 derive(JsonSchema) 后，用 args_schema::<T>() 得到可声明给 LLM 的 schema。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回参数类型 T 的 JSON Schema（去掉 `$schema` 元字段）
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct DetectArgs {
        /// 图片路径
        image: String,
        min_confidence: Option<f64>,
    }

    #[test]
    fn test_args_schema_lists_required_fields() {
        let schema = args_schema::<DetectArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&Value::from("image")));
        assert!(!required.contains(&Value::from("min_confidence")));
    }
}
