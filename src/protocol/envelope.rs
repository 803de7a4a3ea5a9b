//! Agent2Agent 消息信封
//!
//! 智能体之间通信的唯一单元。信封构造后不可变：状态变化通过 `follow_up` 产生一个
//! 共享同一 correlation_id 的新信封来表达，从不修改历史。
//! context 是开放的 JSON 对象，每个智能体只读自己认识的键，其余原样透传。

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::AgentId;

/// 案件上下文：开放 schema 的 JSON 对象
pub type Context = serde_json::Map<String, Value>;

/// 信封状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Retry,
    Success,
    Error,
    Escalated,
    Completed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retry => "retry",
            Self::Success => "success",
            Self::Error => "error",
            Self::Escalated => "escalated",
            Self::Completed => "completed",
        }
    }

    /// 只有 error / escalated 状态允许携带 error 负载
    pub fn carries_error(&self) -> bool {
        matches!(self, Self::Error | Self::Escalated)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化错误负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub message: String,
    pub retry_count: u32,
}

impl EnvelopeError {
    pub fn new(message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            message: message.into(),
            retry_count,
        }
    }
}

/// 不可变的 A2A 消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    sender: AgentId,
    receiver: AgentId,
    action: String,
    context: Context,
    correlation_id: String,
    timestamp: DateTime<Utc>,
    status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<EnvelopeError>,
}

impl Envelope {
    /// 以默认值（pending、新 correlation_id、无 error）创建信封
    pub fn create(
        sender: impl Into<AgentId>,
        receiver: impl Into<AgentId>,
        action: impl Into<String>,
        context: Context,
    ) -> Self {
        Self::builder(sender, receiver, action, context).build()
    }

    pub fn builder(
        sender: impl Into<AgentId>,
        receiver: impl Into<AgentId>,
        action: impl Into<String>,
        context: Context,
    ) -> EnvelopeBuilder {
        EnvelopeBuilder {
            sender: sender.into(),
            receiver: receiver.into(),
            action: action.into(),
            context,
            status: MessageStatus::Pending,
            correlation_id: None,
            error: None,
        }
    }

    /// 同一条因果链上的下一条信封：沿用本信封的 correlation_id
    pub fn follow_up(
        &self,
        sender: impl Into<AgentId>,
        receiver: impl Into<AgentId>,
        action: impl Into<String>,
        context: Context,
    ) -> EnvelopeBuilder {
        Self::builder(sender, receiver, action, context)
            .correlation_id(Some(self.correlation_id.clone()))
    }

    /// 校验一个原始 JSON 值是否符合信封 schema
    ///
    /// 只有 error / escalated 状态允许携带 error 负载。
    pub fn validate(raw: &Value) -> Result<Envelope, serde_json::Error> {
        let envelope = Envelope::deserialize(raw)?;
        if envelope.error.is_some() && !envelope.status.carries_error() {
            return Err(serde::de::Error::custom(format!(
                "error payload is not allowed with status {}",
                envelope.status
            )));
        }
        Ok(envelope)
    }

    pub fn sender(&self) -> &AgentId {
        &self.sender
    }

    pub fn receiver(&self) -> &AgentId {
        &self.receiver
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn error(&self) -> Option<&EnvelopeError> {
        self.error.as_ref()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 信封构造器；build() 之后信封即不可变
#[derive(Debug)]
pub struct EnvelopeBuilder {
    sender: AgentId,
    receiver: AgentId,
    action: String,
    context: Context,
    status: MessageStatus,
    correlation_id: Option<String>,
    error: Option<EnvelopeError>,
}

impl EnvelopeBuilder {
    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// None 时生成新的 correlation_id；Some 时复用调用方的 id（重试链共享）
    pub fn correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn error(mut self, error: EnvelopeError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn build(self) -> Envelope {
        let error = if self.status.carries_error() {
            self.error
        } else {
            None
        };
        Envelope {
            sender: self.sender,
            receiver: self.receiver,
            action: self.action,
            context: self.context,
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            timestamp: monotonic_now(),
            status: self.status,
            error,
        }
    }
}

static LAST_TIMESTAMP: Mutex<Option<DateTime<Utc>>> = Mutex::new(None);

/// 进程内单调不减的 UTC 时间（系统时钟回拨时沿用上一次的值）
pub fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now();
    let mut last = LAST_TIMESTAMP
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let ts = match *last {
        Some(prev) if prev > now => prev,
        _ => now,
    };
    *last = Some(ts);
    ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        json!({"mutation_id": "1001", "user_id": "u001"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let msg = Envelope::create(AgentId::INVESTIGATION, AgentId::RIGHTS_CHECK, "check_rights", ctx());
        assert_eq!(msg.status(), MessageStatus::Pending);
        assert!(msg.error().is_none());
        assert!(!msg.correlation_id().is_empty());
        assert_eq!(msg.sender(), &AgentId::from(AgentId::INVESTIGATION));
    }

    #[test]
    fn test_fresh_correlation_ids_differ() {
        let a = Envelope::create("A", "B", "x", Context::new());
        let b = Envelope::create("A", "B", "x", Context::new());
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn test_follow_up_keeps_correlation() {
        let first = Envelope::create("Orchestrator", "RightsCheckAgent", "handle_request", ctx());
        let reply = first
            .follow_up("RightsCheckAgent", "Orchestrator", "handle_request_result", ctx())
            .status(MessageStatus::Error)
            .error(EnvelopeError::new("boom", 1))
            .build();
        assert_eq!(reply.correlation_id(), first.correlation_id());
        assert_eq!(reply.error().unwrap().retry_count, 1);
        // 原信封不受影响
        assert_eq!(first.status(), MessageStatus::Pending);
    }

    #[test]
    fn test_error_dropped_for_non_error_status() {
        let msg = Envelope::builder("A", "B", "x", Context::new())
            .status(MessageStatus::Success)
            .error(EnvelopeError::new("ignored", 1))
            .build();
        assert!(msg.error().is_none());
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let stamps: Vec<_> = (0..50).map(|_| monotonic_now()).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_validate_roundtrip_and_rejects_bad_status() {
        let msg = Envelope::create("A", "B", "x", ctx());
        let raw = msg.to_json();
        assert!(Envelope::validate(&raw).is_ok());

        let mut bad = raw.clone();
        bad["status"] = json!("unknown_status");
        assert!(Envelope::validate(&bad).is_err());

        let mut no_ctx = raw;
        no_ctx["context"] = json!("not a map");
        assert!(Envelope::validate(&no_ctx).is_err());
    }

    #[test]
    fn test_validate_error_payload_needs_error_status() {
        let failed = Envelope::builder("A", "B", "x", ctx())
            .status(MessageStatus::Error)
            .error(EnvelopeError::new("boom", 2))
            .build();
        let raw = failed.to_json();
        assert_eq!(Envelope::validate(&raw).unwrap().error().unwrap().retry_count, 2);

        let mut escalated = raw.clone();
        escalated["status"] = json!("escalated");
        assert!(Envelope::validate(&escalated).is_ok());

        for status in ["pending", "retry", "success", "completed"] {
            let mut bad = raw.clone();
            bad["status"] = json!(status);
            let err = Envelope::validate(&bad).unwrap_err();
            assert!(err.to_string().contains(status), "{status}: {err}");
        }
    }
}
