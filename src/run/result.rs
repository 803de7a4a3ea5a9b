//! 智能体一次处理的结构化结果

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentResultStatus {
    Completed,
    Error,
}

impl fmt::Display for AgentResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// completed 时带 response，error 时带 error；context 为该智能体收到的输入上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    pub status: AgentResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub context: Context,
}

impl AgentResult {
    pub fn completed(agent: impl Into<String>, response: impl Into<String>, context: Context) -> Self {
        Self {
            agent: agent.into(),
            status: AgentResultStatus::Completed,
            response: Some(response.into()),
            error: None,
            context,
        }
    }

    pub fn error(agent: impl Into<String>, error: impl Into<String>, context: Context) -> Self {
        Self {
            agent: agent.into(),
            status: AgentResultStatus::Error,
            response: None,
            error: Some(error.into()),
            context,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentResultStatus::Completed
    }

    /// 去掉 context 的摘要，作为后续阶段的输入（避免上下文逐级嵌套膨胀）
    pub fn summary(&self) -> Value {
        let mut v = json!({
            "agent": self.agent,
            "status": self.status,
        });
        if let Some(r) = &self.response {
            v["response"] = Value::String(r.clone());
        }
        if let Some(e) = &self.error {
            v["error"] = Value::String(e.clone());
        }
        v
    }

    /// 错误说明（completed 时为空串）
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_drops_context() {
        let mut ctx = Context::new();
        ctx.insert("mutation_id".into(), json!("M1"));
        let r = AgentResult::completed("InvestigationAgent", "all good", ctx);
        let s = r.summary();
        assert_eq!(s["status"], "completed");
        assert_eq!(s["response"], "all good");
        assert!(s.get("context").is_none());
        assert!(s.get("error").is_none());
    }

    #[test]
    fn test_error_serialization_omits_response() {
        let r = AgentResult::error("RightsCheckAgent", "boom", Context::new());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "error");
        assert!(v.get("response").is_none());
        assert_eq!(r.error_message(), "boom");
    }
}
