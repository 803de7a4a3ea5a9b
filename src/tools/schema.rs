//! 工具参数 JSON Schema 生成（schemars）
//!
//! 每个工具用一个 `#[derive(JsonSchema)]` 的参数结构体描述参数，生成的 schema 作为 function calling 的 parameters。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 生成 T 的参数 schema：子 schema 内联，去掉 `$schema` / `title` 这类后端不需要的键
pub fn parameters_schema_of<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
    }
    value
}
