//! notify_send：向用户 / 经理发出信息请求，并登记一条待人工处理动作

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audit::PendingStore;
use crate::tools::schema::parameters_schema_of;
use crate::tools::Tool;

/// 待办动作的 type 列
pub const RFI_ACTION_TYPE: &str = "request_for_information";

#[derive(Debug, Deserialize, JsonSchema)]
struct NotifyArgs {
    recipient_id: String,
    subject: String,
    body: String,
    /// 随请求保存的案件上下文（应包含 mutation_id）
    #[serde(default)]
    context: Option<Value>,
}

pub struct NotifySendTool {
    store: PendingStore,
}

impl NotifySendTool {
    pub fn new(store: PendingStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for NotifySendTool {
    fn name(&self) -> &str {
        "notify_send"
    }

    fn description(&self) -> &str {
        "Send a request for information to a user or manager. The request stays pending until a human responds."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_of::<NotifyArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: NotifyArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let stored = json!({
            "subject": args.subject,
            "body": args.body,
            "context": args.context.clone().unwrap_or(Value::Null),
        });

        let store = self.store.clone();
        let recipient = args.recipient_id.clone();
        let action = tokio::task::spawn_blocking(move || {
            store.create(RFI_ACTION_TYPE, &recipient, &stored)
        })
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

        Ok(json!({
            "status": "sent",
            "message_id": action.action_id,
            "message": format!("Notification sent to {}", args.recipient_id),
            "recipient_id": args.recipient_id,
            "subject": args.subject,
            "body": args.body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_send_creates_pending_action() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("pending.csv"));
        let tool = NotifySendTool::new(store.clone());

        let out = tool
            .execute(json!({
                "recipient_id": "u001",
                "subject": "Why was your role changed?",
                "body": "Please explain mutation 1001.",
                "context": {"mutation_id": "1001"}
            }))
            .await
            .unwrap();
        assert_eq!(out["status"], "sent");

        let pending = store.list_pending(Some("u001")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_id, out["message_id"].as_str().unwrap());
        assert_eq!(pending[0].action_type, RFI_ACTION_TYPE);
        assert_eq!(pending[0].context_json()["context"]["mutation_id"], "1001");
    }

    #[tokio::test]
    async fn test_missing_fields_is_error() {
        let dir = TempDir::new().unwrap();
        let tool = NotifySendTool::new(PendingStore::new(dir.path().join("pending.csv")));
        assert!(tool.execute(json!({"recipient_id": "u001"})).await.is_err());
    }
}
