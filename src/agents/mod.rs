//! 智能体层：Agent trait、内置定义与模型驱动实现

pub mod definition;
pub mod model_agent;

use async_trait::async_trait;

pub use definition::AgentDefinition;
pub use model_agent::ModelAgent;

use crate::core::AgentError;
use crate::protocol::{AgentId, Context};
use crate::run::AgentResult;

/// 流水线中的一个参与者：处理上下文，返回结构化结果
///
/// 模型或工具失败以 `AgentResult { status: error }` 返回；Err 只用于契约违反（如会话未初始化）。
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &AgentId;

    async fn handle(&self, context: &Context, correlation_id: &str) -> Result<AgentResult, AgentError>;
}
