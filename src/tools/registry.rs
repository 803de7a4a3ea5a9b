//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolDispatcher 在调用时加超时、重试并写审计记录。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 与返回值均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型发起 tool call 时使用）
    fn name(&self) -> &str;

    /// 工具描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 中的字符串会进入审计记录并触发重试
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 声明给推理后端的工具规格（function calling 的 name / description / parameters）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous implementation replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 按名称排序，保证生成的 prompt / 规格稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    fn spec_of(name: &str, tool: &Arc<dyn Tool>) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }

    /// 全部工具的规格
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tool_names()
            .iter()
            .filter_map(|n| self.tools.get(n).map(|t| Self::spec_of(n, t)))
            .collect()
    }

    /// 指定名称子集的规格；未注册的名称记一条警告后跳过
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| match self.tools.get(n) {
                Some(t) => Some(Self::spec_of(n, t)),
                None => {
                    tracing::warn!(tool = %n, "agent references unregistered tool");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        async fn execute(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("b"));
        reg.register(Named("a"));
        assert_eq!(reg.tool_names(), vec!["a", "b"]);
        let out = reg.get("a").unwrap().execute(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(out["x"], 1);
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn test_specs_for_skips_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(Named("lookup_data"));
        let specs = reg.specs_for(&["lookup_data".to_string(), "nope".to_string()]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "lookup_data");
        assert_eq!(specs[0].parameters["type"], "object");
    }
}
