//! 流水线类型定义
//!
//! 阶段、路由结果、升级信息与整条流水线的最终结果

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{AgentId, Context};
use crate::run::AgentResult;

/// 流水线阶段（固定拓扑，按声明顺序执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Investigation,
    RightsCheck,
    InformationUser,
    InformationManager,
    Advisory,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Investigation,
        Stage::RightsCheck,
        Stage::InformationUser,
        Stage::InformationManager,
        Stage::Advisory,
    ];

    /// 负责该阶段的智能体
    pub fn agent(&self) -> &'static str {
        match self {
            Self::Investigation => AgentId::INVESTIGATION,
            Self::RightsCheck => AgentId::RIGHTS_CHECK,
            Self::InformationUser | Self::InformationManager => AgentId::REQUEST_FOR_INFORMATION,
            Self::Advisory => AgentId::ADVISORY,
        }
    }

    /// 结果写回上下文时使用的键
    pub fn result_key(&self) -> &'static str {
        match self {
            Self::Investigation => "investigation",
            Self::RightsCheck => "rights_check",
            Self::InformationUser => "information_user_request",
            Self::InformationManager => "information_manager_request",
            Self::Advisory => "advisory_report",
        }
    }

    /// 信息请求阶段的对象（user / manager）
    pub fn rfi_subject(&self) -> Option<&'static str> {
        match self {
            Self::InformationUser => Some("user"),
            Self::InformationManager => Some("manager"),
            _ => None,
        }
    }

    /// 从上下文中查找收件人的候选键，按优先级
    pub fn recipient_keys(&self) -> &'static [&'static str] {
        match self {
            Self::InformationUser => &["user_id", "ChangedFor", "UserID"],
            Self::InformationManager => &["manager_id", "ManagerID", "Manager"],
            _ => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.result_key())
    }
}

/// 重试耗尽后的升级信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub agent: String,
    /// 最后一次尝试的错误
    pub error: String,
    pub attempts: u32,
    pub escalation: String,
    pub correlation_id: String,
    pub context: Context,
}

/// Orchestrator::route 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Completed(AgentResult),
    Escalated(Escalation),
}

impl RouteOutcome {
    pub fn is_escalated(&self) -> bool {
        matches!(self, Self::Escalated(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Escalated,
}

/// 升级时流水线停在哪一阶段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEscalation {
    pub stage: Stage,
    #[serde(flatten)]
    pub detail: Escalation,
}

/// 一条流水线的最终结果：已完成阶段的结果按顺序保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub mutation_id: String,
    pub stages: Vec<(Stage, AgentResult)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<StageEscalation>,
    /// 累积的上下文（初始上下文 + 各阶段结果摘要）
    pub context: Context,
}

impl PipelineOutcome {
    pub fn result(&self, stage: Stage) -> Option<&AgentResult> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, r)| r)
    }

    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}
