//! 核心层：错误类型与重试 / 升级策略

pub mod error;
pub mod recovery;

pub use error::{AgentError, RecoveryAction};
pub use recovery::{RecoveryEngine, ESCALATION_MESSAGE};
