//! generate_report：为一次变更生成咨询报告

use async_trait::async_trait;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::parameters_schema_of;
use crate::tools::Tool;

const NO_ISSUES: &str = "Review completed. No issues found.";
const UNBACKED_ACCESS: &str = "Access is not backed by an authorisation record. Revoke or obtain a justification.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ReportArgs {
    mutation_id: String,
    /// 前序阶段汇总的发现
    #[serde(default)]
    context: Value,
}

#[derive(Debug, Default)]
pub struct GenerateReportTool;

#[async_trait]
impl Tool for GenerateReportTool {
    fn name(&self) -> &str {
        "generate_report"
    }

    fn description(&self) -> &str {
        "Generate the advisory report for a mutation. Returns {report_id, summary, recommendation, details}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_of::<ReportArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: ReportArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let report_id = format!(
            "RPT-{}-{}",
            args.mutation_id,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        let recommendation = if contains_denied_authorization(&args.context) {
            UNBACKED_ACCESS
        } else {
            NO_ISSUES
        };
        Ok(json!({
            "report_id": report_id,
            "summary": format!("Advisory report for mutation {}", args.mutation_id),
            "recommendation": recommendation,
            "details": args.context,
        }))
    }
}

/// 任一层级出现 `"authorized": false`
fn contains_denied_authorization(v: &Value) -> bool {
    match v {
        Value::Object(map) => {
            map.get("authorized") == Some(&Value::Bool(false))
                || map.values().any(contains_denied_authorization)
        }
        Value::Array(items) => items.iter().any(contains_denied_authorization),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_shape() {
        let out = GenerateReportTool
            .execute(json!({"mutation_id": "1001", "context": {"findings": {"rights_check": true}}}))
            .await
            .unwrap();
        assert!(out["report_id"].as_str().unwrap().starts_with("RPT-1001-"));
        assert_eq!(out["recommendation"], NO_ISSUES);
        assert_eq!(out["details"]["findings"]["rights_check"], true);
    }

    #[tokio::test]
    async fn test_denied_authorization_changes_recommendation() {
        let out = GenerateReportTool
            .execute(json!({"mutation_id": "1002", "context": {"rights": [{"authorized": false}]}}))
            .await
            .unwrap();
        assert_eq!(out["recommendation"], UNBACKED_ACCESS);
    }
}
