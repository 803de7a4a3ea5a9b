//! AccessGuard - HR 变更调查智能体流水线
//!
//! 模块划分：
//! - **agents**: Agent trait、四个内置智能体定义与模型驱动实现
//! - **audit**: 只追加审计账本（轮转、查询、迁移）与待人工处理动作队列
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、重试 / 升级策略
//! - **llm**: 推理后端抽象与实现（Assistants REST / Mock）
//! - **observability**: 日志初始化
//! - **protocol**: Agent2Agent 消息信封
//! - **run**: run 轮询状态机
//! - **tools**: 本地工具、注册表与分发器
//! - **workflow**: A2A 路由、五阶段流水线、人工响应

pub mod agents;
pub mod audit;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod protocol;
pub mod run;
pub mod tools;
pub mod workflow;

pub use workflow::{Pipeline, PipelineBuilder, PipelineOutcome, Runtime};
