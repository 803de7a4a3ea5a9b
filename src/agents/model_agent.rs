//! 模型驱动的智能体
//!
//! 持有定义、共享的 RunDriver 与自己独占的会话（assistant + thread）。会话由 initialize 显式建立；
//! 同一 thread 上同时只允许一个 run，所以 handle 在整个 run 期间持有会话锁。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::agents::{Agent, AgentDefinition};
use crate::core::AgentError;
use crate::llm::{AgentSession, AgentSpec};
use crate::protocol::{AgentId, Context};
use crate::run::{AgentResult, RunDriver};

pub struct ModelAgent {
    definition: AgentDefinition,
    driver: Arc<RunDriver>,
    model: String,
    temperature: f32,
    session: Mutex<Option<AgentSession>>,
}

impl ModelAgent {
    pub fn new(definition: AgentDefinition, driver: Arc<RunDriver>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            definition,
            driver,
            model: model.into(),
            temperature,
            session: Mutex::new(None),
        }
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// 建立会话；已建立时直接返回
    pub async fn initialize(&self) -> Result<(), AgentError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let spec = AgentSpec {
            name: self.definition.id.to_string(),
            model: self.model.clone(),
            instructions: self.definition.instructions.clone(),
            tool_specs: self
                .driver
                .dispatcher()
                .registry()
                .specs_for(&self.definition.tools),
            temperature: self.temperature,
        };
        let session = self.driver.client().create_session(&spec).await?;
        tracing::info!(agent = %self.definition.id, thread_id = %session.thread_id, "agent initialized");
        *slot = Some(session);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn id(&self) -> &AgentId {
        &self.definition.id
    }

    async fn handle(&self, context: &Context, correlation_id: &str) -> Result<AgentResult, AgentError> {
        let slot = self.session.lock().await;
        let session = slot
            .as_ref()
            .ok_or_else(|| AgentError::SessionNotInitialized(self.definition.id.to_string()))?;
        let prompt = self.definition.build_prompt(context);
        Ok(self
            .driver
            .drive(&self.definition.id, session, &prompt, context, correlation_id)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::audit::{AuditLedger, PendingStore};
    use crate::llm::{MockBackend, MockRun};
    use crate::tools::{default_registry, DataTables, ToolDispatcher};

    fn agent(dir: &TempDir, mock: Arc<MockBackend>) -> ModelAgent {
        let ledger = AuditLedger::new(dir.path().join("audit.csv"), 1 << 20);
        let registry = default_registry(
            DataTables::new(dir.path()),
            PendingStore::new(dir.path().join("pending.csv")),
        );
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), ledger, 5, 3));
        let driver = Arc::new(RunDriver::new(mock, dispatcher, Duration::from_millis(1), 10));
        ModelAgent::new(AgentDefinition::investigation(), driver, "mock", 0.0)
    }

    #[tokio::test]
    async fn test_handle_requires_initialize() {
        let dir = TempDir::new().unwrap();
        let a = agent(&dir, Arc::new(MockBackend::new()));
        let err = a.handle(&Context::new(), "c").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionNotInitialized(_)));
    }

    #[tokio::test]
    async fn test_initialize_once_then_handle() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockBackend::new());
        mock.script(AgentId::INVESTIGATION, MockRun::reply("Mutation 1001 changed Bob's role."));
        let a = agent(&dir, mock.clone());
        a.initialize().await.unwrap();
        a.initialize().await.unwrap();
        assert!(a.is_initialized().await);

        let mut ctx = Context::new();
        ctx.insert("mutation_id".into(), serde_json::json!("1001"));
        let r = a.handle(&ctx, "c").await.unwrap();
        assert!(r.is_completed());
        assert_eq!(r.context, ctx);
        assert_eq!(mock.posted_messages(AgentId::INVESTIGATION).len(), 1);
    }
}
