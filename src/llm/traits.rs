//! 推理后端抽象
//!
//! 所有后端（Assistants REST / Mock）实现 ReasoningBackend：为每个智能体建立会话（assistant + thread），
//! 在 thread 上发消息、发起 run、轮询 run、提交工具输出、读取最后一条助手回复。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::run::RunStatus;
use crate::tools::ToolSpec;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Mock 后端按脚本模拟的传输错误
    #[error("Transport error: {0}")]
    Transport(String),
}

/// 创建会话所需的智能体规格
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tool_specs: Vec<ToolSpec>,
    pub temperature: f32,
}

/// 一个智能体独占的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub assistant_id: String,
    pub thread_id: String,
}

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 提交回后端的工具输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// 一次轮询看到的 run 状态
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub id: String,
    pub status: RunStatus,
    /// 仅在 requires_action 时非空
    pub tool_calls: Vec<ToolCallRequest>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn create_session(&self, spec: &AgentSpec) -> Result<AgentSession, LlmError>;

    async fn post_message(&self, session: &AgentSession, content: &str) -> Result<(), LlmError>;

    async fn create_run(&self, session: &AgentSession) -> Result<RunSnapshot, LlmError>;

    async fn get_run(&self, session: &AgentSession, run_id: &str) -> Result<RunSnapshot, LlmError>;

    async fn submit_tool_outputs(
        &self,
        session: &AgentSession,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunSnapshot, LlmError>;

    /// thread 上最新一条助手消息的文本；没有则 None
    async fn last_assistant_message(&self, session: &AgentSession) -> Result<Option<String>, LlmError>;
}

/// 进程内共享的推理客户端句柄：由入口构造一次，经 Arc 传给各智能体
pub type ReasoningClient = Arc<dyn ReasoningBackend>;
