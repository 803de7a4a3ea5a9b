//! 推理层：后端抽象与实现（Assistants REST / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockBackend, MockPoll, MockRun};
pub use openai::AssistantsBackend;
pub use traits::{
    AgentSession, AgentSpec, LlmError, ReasoningBackend, ReasoningClient, RunSnapshot, ToolCallRequest,
    ToolOutput,
};

use crate::config::LlmSection;

/// 按配置创建推理客户端：provider = mock 或缺少 API Key 时使用 Mock 后端
pub fn create_reasoning_client(cfg: &LlmSection) -> Result<ReasoningClient, LlmError> {
    if cfg.provider.eq_ignore_ascii_case("mock") {
        tracing::info!("reasoning backend: mock");
        return Ok(Arc::new(MockBackend::new()));
    }

    let key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.trim().is_empty());
    match key {
        Some(key) => {
            tracing::info!(
                provider = %cfg.provider,
                model = %cfg.model,
                base_url = cfg.base_url.as_deref().unwrap_or("default"),
                "reasoning backend: assistants"
            );
            let backend = AssistantsBackend::new(
                cfg.base_url.as_deref(),
                &key,
                &cfg.auth_header,
                cfg.api_version.as_deref(),
                cfg.timeouts.request,
            )?;
            Ok(Arc::new(backend))
        }
        None => {
            tracing::warn!(env = %cfg.api_key_env, "no API key set, falling back to mock reasoning backend");
            Ok(Arc::new(MockBackend::new()))
        }
    }
}
