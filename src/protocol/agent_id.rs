//! 智能体标识
//!
//! 封闭但可扩展的标识集合：流水线内置四个智能体 + 编排器 / 工具调用 / UI 三个伪参与者，
//! 测试或插件可以用任意字符串构造新的标识。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 智能体标识（信封的 sender / receiver、审计记录的 Agent 列）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub const INVESTIGATION: &'static str = "InvestigationAgent";
    pub const RIGHTS_CHECK: &'static str = "RightsCheckAgent";
    pub const REQUEST_FOR_INFORMATION: &'static str = "RequestForInformationAgent";
    pub const ADVISORY: &'static str = "AdvisoryAgent";
    pub const ORCHESTRATOR: &'static str = "Orchestrator";
    /// 工具调用的接收方
    pub const TOOL_CALL: &'static str = "ToolCall";
    pub const UI: &'static str = "UI";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn orchestrator() -> Self {
        Self::new(Self::ORCHESTRATOR)
    }

    pub fn tool_call() -> Self {
        Self::new(Self::TOOL_CALL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 是否为内置流水线中的智能体
    pub fn is_builtin_agent(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::INVESTIGATION | Self::RIGHTS_CHECK | Self::REQUEST_FOR_INFORMATION | Self::ADVISORY
        )
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&AgentId> for AgentId {
    fn from(id: &AgentId) -> Self {
        id.clone()
    }
}

impl PartialEq<str> for AgentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AgentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
