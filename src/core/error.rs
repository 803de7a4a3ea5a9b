//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 与已尝试次数决定 Retry / Escalate / Abort。
//! 只有契约违反（未知智能体、会话未初始化）会以 Err 形式冒泡到调用方；
//! 模型与工具失败都以结构化结果在带内返回。

use thiserror::Error;

use crate::audit::{LedgerError, PendingError};
use crate::llm::LlmError;

/// 流水线运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 路由到未注册的智能体
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent session not initialized: {0}")]
    SessionNotInitialized(String),

    /// 某一阶段的一次尝试失败（由 Orchestrator::route 转换而来）
    #[error("{agent} failed: {message}")]
    StageFailed { agent: String, message: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型请求了注册表中不存在的工具
    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Audit ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Pending action error: {0}")]
    Pending(#[from] PendingError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 恢复引擎根据错误类型与尝试次数给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 立即再试一次（同一 correlation_id）
    Retry,
    /// 尝试次数耗尽：交给人工
    Escalate(String),
    /// 结果确定、重试无意义（如未知工具），直接放弃
    Abort,
}
