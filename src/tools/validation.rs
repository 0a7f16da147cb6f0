//! 工具参数校验：按工具声明的 JSON Schema 做顶层检查
//!
//! 覆盖 type=object、required 字段、属性类型与 enum；不支持的关键字直接放行。

use serde_json::Value;

/// 校验通过返回 Ok(())，否则返回第一处违规的描述
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if let Some(schema_type) = schema.get("type").and_then(|v| v.as_str()) {
        if schema_type == "object" && !args.is_object() {
            return Err(format!(
                "expected object arguments, got {}",
                json_type_name(args)
            ));
        }
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let Some(prop) = properties.get(key) else {
                continue;
            };
            if let Some(expected) = prop.get("type") {
                if !type_matches(value, expected) {
                    return Err(format!(
                        "field '{}' expected type {}, got {}",
                        key,
                        expected,
                        json_type_name(value)
                    ));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(|v| v.as_array()) {
                if !allowed.contains(value) {
                    return Err(format!("field '{key}' must be one of {}", Value::Array(allowed.clone())));
                }
            }
        }
    }

    Ok(())
}

/// `type` 可以是字符串或字符串数组（schemars 对 Option<T> 生成 ["string", "null"]）
fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(t) => value_matches_type(value, t),
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| value_matches_type(value, t)),
        _ => true,
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detect_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "image": { "type": "string" },
                "min_confidence": { "type": "number" },
                "mode": { "type": "string", "enum": ["fast", "accurate"] },
                "note": { "type": ["string", "null"] }
            },
            "required": ["image"]
        })
    }

    #[test]
    fn test_rejects_non_object_args() {
        let err = validate_arguments(&json!("img.jpg"), &detect_schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn test_rejects_missing_required_field() {
        let err = validate_arguments(&json!({}), &detect_schema()).unwrap_err();
        assert!(err.contains("missing required field 'image'"));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let err = validate_arguments(&json!({"image": 7}), &detect_schema()).unwrap_err();
        assert!(err.contains("field 'image'"));
    }

    #[test]
    fn test_enum_and_nullable_fields() {
        let schema = detect_schema();
        assert!(validate_arguments(&json!({"image": "a", "mode": "fast"}), &schema).is_ok());
        assert!(validate_arguments(&json!({"image": "a", "mode": "slow"}), &schema).is_err());
        assert!(validate_arguments(&json!({"image": "a", "note": null}), &schema).is_ok());
    }

    #[test]
    fn test_accepts_extra_fields_and_empty_schema() {
        assert!(validate_arguments(&json!({"image": "a", "extra": 1}), &detect_schema()).is_ok());
        assert!(validate_arguments(&Value::Null, &json!({})).is_ok());
    }
}
