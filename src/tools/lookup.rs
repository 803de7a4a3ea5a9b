//! lookup_data：按键值过滤业务数据表

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::tools::data::DataTables;
use crate::tools::schema::parameters_schema_of;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct LookupArgs {
    /// 逻辑表名：users / hr_mutations / authorisations / role_authorisations / roles / sickLeave / vacation
    file: String,
    /// 列名 → 期望值；所有条件同时满足的行才会返回
    #[serde(default)]
    query: Map<String, Value>,
}

pub struct LookupDataTool {
    tables: DataTables,
}

impl LookupDataTool {
    pub fn new(tables: DataTables) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Tool for LookupDataTool {
    fn name(&self) -> &str {
        "lookup_data"
    }

    fn description(&self) -> &str {
        "Look up rows in an HR data table. Args: {\"file\": \"users\", \"query\": {\"UserID\": \"u001\"}}"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_of::<LookupArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: LookupArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let results = self.tables.lookup(&args.file, &args.query).await?;
        Ok(json!({ "results": results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool_with_users() -> (TempDir, LookupDataTool) {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("users.csv"),
            "# users\nUserID,Name,Manager\nu001,Alice,m001\nu002,Bob,m001\n",
        )
        .unwrap();
        let tool = LookupDataTool::new(DataTables::new(dir.path()));
        (dir, tool)
    }

    #[tokio::test]
    async fn test_lookup_filters() {
        let (_dir, tool) = tool_with_users();
        let out = tool
            .execute(json!({"file": "users", "query": {"UserID": "u002"}}))
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["Name"], "Bob");
    }

    #[tokio::test]
    async fn test_lookup_empty_query_returns_all() {
        let (_dir, tool) = tool_with_users();
        let out = tool.execute(json!({"file": "users.csv"})).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_file_is_error() {
        let (_dir, tool) = tool_with_users();
        let err = tool
            .execute(json!({"file": "salaries", "query": {}}))
            .await
            .unwrap_err();
        assert!(err.contains("Unknown CSV file"));
    }
}
