//! Run 层：轮询状态机、run 状态与智能体结果

pub mod driver;
pub mod result;
pub mod status;

pub use driver::{RunDriver, NO_RESPONSE_MESSAGE};
pub use result::{AgentResult, AgentResultStatus};
pub use status::RunStatus;
