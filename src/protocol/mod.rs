//! Agent2Agent 协议：智能体标识与不可变消息信封

pub mod agent_id;
pub mod envelope;

pub use agent_id::AgentId;
pub use envelope::{monotonic_now, Context, Envelope, EnvelopeBuilder, EnvelopeError, MessageStatus};
