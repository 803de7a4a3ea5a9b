//! check_authorization：用户在某系统上是否有指定访问级别的授权记录

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::data::{column, DataTables};
use crate::tools::schema::parameters_schema_of;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct AuthorizationArgs {
    user_id: String,
    system: String,
    access_level: String,
}

pub struct CheckAuthorizationTool {
    tables: DataTables,
}

impl CheckAuthorizationTool {
    pub fn new(tables: DataTables) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl Tool for CheckAuthorizationTool {
    fn name(&self) -> &str {
        "check_authorization"
    }

    fn description(&self) -> &str {
        "Check whether a user holds an authorisation for a system at an access level. Returns {authorized, evidence, message}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_of::<AuthorizationArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: AuthorizationArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let rows = self.tables.read("authorisations").await?;
        let evidence: Vec<_> = rows
            .into_iter()
            .filter(|r| {
                column(r, "UserID") == Some(args.user_id.as_str())
                    && column(r, "System") == Some(args.system.as_str())
                    && column(r, "AccessLevel") == Some(args.access_level.as_str())
            })
            .collect();
        let authorized = !evidence.is_empty();
        Ok(json!({
            "authorized": authorized,
            "evidence": evidence,
            "message": if authorized { "Authorized" } else { "Not authorized" },
        }))
    }
}
