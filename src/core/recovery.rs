//! 错误恢复引擎
//!
//! 根据 AgentError 类型与已尝试次数返回 RecoveryAction，供工具分发器与编排器决定是重试、升级还是放弃。

use crate::core::{AgentError, RecoveryAction};

/// 重试耗尽后写入升级记录的说明
pub const ESCALATION_MESSAGE: &str = "Manual intervention required after repeated failures.";

/// 有界重试策略：最多 max_attempts 次尝试，之后升级
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_attempts: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RecoveryEngine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// attempt 为刚刚失败的那次尝试的序号（从 1 开始）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err {
            // 确定性失败：再试结果也一样
            AgentError::HallucinatedTool(_)
            | AgentError::UnknownAgent(_)
            | AgentError::SessionNotInitialized(_)
            | AgentError::ConfigError(_) => RecoveryAction::Abort,
            _ if attempt < self.max_attempts => RecoveryAction::Retry,
            _ => RecoveryAction::Escalate(ESCALATION_MESSAGE.to_string()),
        }
    }
}
