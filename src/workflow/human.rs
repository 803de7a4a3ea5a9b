//! 人工响应：处理信息请求阶段发出的待办动作

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::audit::{extract_mutation_id, AuditLedger, AuditRecord, PendingAction, PendingError, PendingStore};
use crate::core::AgentError;

pub struct HumanResponseHandler {
    store: PendingStore,
    ledger: AuditLedger,
    overdue_after: Duration,
}

impl HumanResponseHandler {
    pub fn new(store: PendingStore, ledger: AuditLedger, overdue_after: Duration) -> Self {
        Self {
            store,
            ledger,
            overdue_after,
        }
    }

    pub fn store(&self) -> &PendingStore {
        &self.store
    }

    /// recipient 为 None 时列出全部 pending
    pub async fn pending_for(&self, recipient: Option<&str>) -> Result<Vec<PendingAction>, AgentError> {
        let store = self.store.clone();
        let recipient = recipient.map(str::to_string);
        let actions = tokio::task::spawn_blocking(move || store.list_pending(recipient.as_deref()))
            .await
            .map_err(|e| PendingError::Join(e.to_string()))??;
        Ok(actions)
    }

    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<PendingAction>, AgentError> {
        let store = self.store.clone();
        let threshold = self.overdue_after;
        let actions = tokio::task::spawn_blocking(move || store.overdue(now, threshold))
            .await
            .map_err(|e| PendingError::Join(e.to_string()))??;
        Ok(actions)
    }

    /// 记录人工答复：先写审计记录，成功后才把动作翻转为 responded
    pub async fn respond(
        &self,
        action_id: &str,
        responder: &str,
        response: &str,
    ) -> Result<PendingAction, AgentError> {
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        let (id, text, who) = (action_id.to_string(), response.to_string(), responder.to_string());
        let action = tokio::task::spawn_blocking(move || {
            store.respond_with(&id, &text, |action| -> Result<(), AgentError> {
                ledger.append(&response_record(action, &who))?;
                Ok(())
            })
        })
        .await
        .map_err(|e| PendingError::Join(e.to_string()))??;

        tracing::info!(action_id = %action.action_id, responder, "pending action responded");
        Ok(action)
    }
}

fn response_record(action: &PendingAction, responder: &str) -> AuditRecord {
    let mutation_id = match action.context_json() {
        Value::Object(ctx) => extract_mutation_id(&ctx),
        _ => crate::audit::record::UNKNOWN_MUTATION.to_string(),
    };
    let comment = json!({
        "action_id": action.action_id,
        "response": action.response,
    });
    AuditRecord::new(mutation_id, "pending", "responded", responder, comment.to_string())
}
