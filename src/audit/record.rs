//! 审计记录：账本中的一行
//!
//! 一条信封对应一条记录，写入后不再修改；轮转时原样搬进归档文件。

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::{Context, Envelope};

/// 当前账本表头（8 列）
pub const HEADER: [&str; 8] = [
    "AuditID",
    "MutationID",
    "Timestamp",
    "OldStatus",
    "NewStatus",
    "Agent",
    "Comment",
    "Reasoning",
];

/// 旧版账本缺少 Reasoning 列
pub const LEGACY_COLUMNS: usize = 7;

/// 表头行以此开头；它之前的行都是原样保留的说明文字
pub const HEADER_PREFIX: &str = "AuditID";

/// 无法从 context 中找到业务主键时使用
pub const UNKNOWN_MUTATION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "AuditID")]
    pub audit_id: String,
    #[serde(rename = "MutationID")]
    pub mutation_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "OldStatus")]
    pub old_status: String,
    #[serde(rename = "NewStatus")]
    pub new_status: String,
    #[serde(rename = "Agent")]
    pub agent: String,
    #[serde(rename = "Comment")]
    pub comment: String,
    #[serde(rename = "Reasoning", default)]
    pub reasoning: String,
}

impl AuditRecord {
    pub fn new(
        mutation_id: impl Into<String>,
        old_status: impl Into<String>,
        new_status: impl Into<String>,
        agent: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: new_audit_id(),
            mutation_id: mutation_id.into(),
            timestamp: crate::protocol::monotonic_now().to_rfc3339_opts(SecondsFormat::Micros, true),
            old_status: old_status.into(),
            new_status: new_status.into(),
            agent: agent.into(),
            comment: comment.into(),
            reasoning: String::new(),
        }
    }

    /// 由信封生成记录：Agent 取 sender，NewStatus 取信封状态，
    /// OldStatus 取 context.old_status（没有则为空），Comment 是动作与关联信息的 JSON
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let ctx = envelope.context();

        let mut comment = json!({
            "action": envelope.action(),
            "receiver": envelope.receiver().as_str(),
            "correlation_id": envelope.correlation_id(),
        });
        if let Some(err) = envelope.error() {
            comment["error"] = json!({
                "message": err.message,
                "retry_count": err.retry_count,
            });
        }
        if let Some(note) = ctx.get("comment") {
            comment["comment"] = note.clone();
        }

        // Reasoning 列一律存 JSON 文本，字符串也带引号
        let reasoning = match ctx.get("reasoning") {
            None | Some(Value::Null) => String::new(),
            Some(value) => value.to_string(),
        };

        Self {
            audit_id: new_audit_id(),
            mutation_id: extract_mutation_id(ctx),
            timestamp: envelope
                .timestamp()
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            old_status: ctx
                .get("old_status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            new_status: envelope.status().as_str().to_string(),
            agent: envelope.sender().to_string(),
            comment: comment.to_string(),
            reasoning,
        }
    }

    pub fn with_old_status(mut self, old_status: impl Into<String>) -> Self {
        self.old_status = old_status.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: &Value) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    /// 从 CSV 行解析；旧版 7 列行的 Reasoning 视为空
    pub fn from_row(row: &csv::StringRecord) -> Self {
        let cell = |i: usize| row.get(i).unwrap_or_default().to_string();
        Self {
            audit_id: cell(0),
            mutation_id: cell(1),
            timestamp: cell(2),
            old_status: cell(3),
            new_status: cell(4),
            agent: cell(5),
            comment: cell(6),
            reasoning: cell(7),
        }
    }

    /// Comment 列按 JSON 解析（非 JSON 的自由文本返回 None）
    pub fn comment_json(&self) -> Option<Value> {
        serde_json::from_str(&self.comment).ok()
    }

    /// Comment 中记录的 correlation_id
    pub fn correlation_id(&self) -> Option<String> {
        self.comment_json()?
            .get("correlation_id")?
            .as_str()
            .map(str::to_string)
    }
}

/// 8 位十六进制的本地唯一 ID
pub fn new_audit_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// context.mutation_id，其次是第一个携带 mutation_id 的嵌套对象（深度优先），否则 "unknown"
pub fn extract_mutation_id(ctx: &Context) -> String {
    find_mutation_id(ctx).unwrap_or_else(|| UNKNOWN_MUTATION.to_string())
}

fn find_mutation_id(map: &Context) -> Option<String> {
    if let Some(v) = map.get("mutation_id").and_then(scalar_to_string) {
        return Some(v);
    }
    map.values().find_map(find_in_value)
}

fn find_in_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(inner) => find_mutation_id(inner),
        Value::Array(items) => items.iter().find_map(find_in_value),
        _ => None,
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
