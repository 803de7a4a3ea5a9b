//! 流水线编排：A2A 路由、五阶段流水线、人工响应与装配

pub mod builder;
pub mod human;
pub mod pipeline;
pub mod router;
pub mod types;

pub use builder::{PipelineBuilder, Runtime};
pub use human::HumanResponseHandler;
pub use pipeline::Pipeline;
pub use router::{Orchestrator, HANDLE_REQUEST};
pub use types::*;
