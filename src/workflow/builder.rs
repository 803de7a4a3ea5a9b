//! 流水线构建器：统一的装配逻辑
//!
//! 配置 → 账本 / 待办队列 / 数据表 / 工具注册表 / 分发器 / RunDriver / 四个智能体 → Orchestrator。
//! CLI 与测试共用同一条装配路径，测试通过 with_client 注入 Mock 后端。

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::agents::{AgentDefinition, ModelAgent};
use crate::audit::{AuditLedger, PendingStore};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{create_reasoning_client, ReasoningClient};
use crate::run::RunDriver;
use crate::tools::{default_registry, DataTables, ToolDispatcher};
use crate::workflow::{HumanResponseHandler, Orchestrator, Pipeline};

/// 装配完成的运行时
pub struct Runtime {
    pub pipeline: Arc<Pipeline>,
    pub human: HumanResponseHandler,
    pub ledger: AuditLedger,
}

pub struct PipelineBuilder {
    config: AppConfig,
    client: Option<ReasoningClient>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config, client: None }
    }

    /// 使用外部给定的推理客户端，而不是按 [llm] 配置创建
    pub fn with_client(mut self, client: ReasoningClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn ledger(&self) -> AuditLedger {
        AuditLedger::from_config(&self.config.audit)
    }

    pub fn pending_store(&self) -> PendingStore {
        PendingStore::new(&self.config.pending.file)
    }

    /// 装配并初始化全部智能体（每个智能体建立自己的会话）
    pub async fn build(self) -> Result<Runtime, AgentError> {
        let cfg = &self.config;
        let client = match &self.client {
            Some(client) => client.clone(),
            None => create_reasoning_client(&cfg.llm)?,
        };

        let ledger = self.ledger();
        let pending = self.pending_store();
        let registry = default_registry(DataTables::new(&cfg.app.data_dir), pending.clone());
        tracing::info!(tools = ?registry.tool_names(), "tool registry ready");

        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(registry),
            ledger.clone(),
            cfg.tools.tool_timeout_secs,
            cfg.tools.max_attempts,
        ));
        let driver = Arc::new(RunDriver::from_config(client, dispatcher, &cfg.runs));

        let agents: Vec<Arc<ModelAgent>> = AgentDefinition::builtin()
            .into_iter()
            .map(|def| {
                Arc::new(ModelAgent::new(
                    def,
                    driver.clone(),
                    cfg.llm.model.clone(),
                    cfg.llm.temperature,
                ))
            })
            .collect();
        try_join_all(agents.iter().map(|a| a.initialize())).await?;

        let mut orchestrator = Orchestrator::new(ledger.clone(), cfg.pipeline.max_retries);
        for agent in agents {
            orchestrator.register(agent);
        }
        tracing::info!(agents = ?orchestrator.agent_names(), "orchestrator ready");

        let human = HumanResponseHandler::new(
            pending,
            ledger.clone(),
            chrono::Duration::seconds(i64::try_from(cfg.pending.overdue_secs).unwrap_or(i64::MAX)),
        );

        Ok(Runtime {
            pipeline: Arc::new(Pipeline::new(Arc::new(orchestrator))),
            human,
            ledger,
        })
    }
}
