//! Run 驱动（状态机）
//!
//! queued → in_progress → requires_action ⇄ 工具分发 → completed | failed，另有后端报告的
//! cancelled / expired / incomplete 终态，以及达到轮询上限时的 timed_out。
//!
//! 每轮先 sleep(poll_interval) 再 get_run；requires_action 时并发分发本批全部 tool call
//! （每个 call 各自在 ToolDispatcher 内顺序重试），整批一次性提交后继续轮询。
//! 后端传输错误、失败终态、超时一律转为 error 结果，不向上抛出。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::audit::record::{extract_mutation_id, UNKNOWN_MUTATION};
use crate::config::RunsSection;
use crate::llm::{AgentSession, LlmError, ReasoningClient, RunSnapshot, ToolCallRequest, ToolOutput};
use crate::protocol::{AgentId, Context};
use crate::run::{AgentResult, RunStatus};
use crate::tools::ToolDispatcher;

/// completed 但 thread 上没有助手消息时的错误文本
pub const NO_RESPONSE_MESSAGE: &str = "No response message found.";

pub struct RunDriver {
    client: ReasoningClient,
    dispatcher: Arc<ToolDispatcher>,
    poll_interval: Duration,
    max_iterations: u32,
}

impl RunDriver {
    pub fn new(
        client: ReasoningClient,
        dispatcher: Arc<ToolDispatcher>,
        poll_interval: Duration,
        max_iterations: u32,
    ) -> Self {
        Self {
            client,
            dispatcher,
            poll_interval,
            max_iterations,
        }
    }

    pub fn from_config(client: ReasoningClient, dispatcher: Arc<ToolDispatcher>, cfg: &RunsSection) -> Self {
        Self::new(client, dispatcher, cfg.poll_interval(), cfg.max_iterations)
    }

    pub fn client(&self) -> &ReasoningClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    /// 把 prompt 发到会话 thread 上并把 run 驱动到终态
    pub async fn drive(
        &self,
        agent: &AgentId,
        session: &AgentSession,
        prompt: &str,
        context: &Context,
        correlation_id: &str,
    ) -> AgentResult {
        match self.drive_inner(agent, session, prompt, context, correlation_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(agent = %agent, correlation_id, error = %e, "reasoning backend error");
                AgentResult::error(agent.as_str(), e.to_string(), context.clone())
            }
        }
    }

    async fn drive_inner(
        &self,
        agent: &AgentId,
        session: &AgentSession,
        prompt: &str,
        context: &Context,
        correlation_id: &str,
    ) -> Result<AgentResult, LlmError> {
        let mutation = extract_mutation_id(context);
        let mutation = (mutation != UNKNOWN_MUTATION).then_some(mutation);

        self.client.post_message(session, prompt).await?;
        let mut run = self.client.create_run(session).await?;
        tracing::info!(agent = %agent, correlation_id, run_id = %run.id, "run created");

        let mut iteration: u32 = 0;
        while run.status.is_active() && iteration < self.max_iterations {
            tokio::time::sleep(self.poll_interval).await;
            run = self.client.get_run(session, &run.id).await?;
            iteration += 1;
            tracing::debug!(agent = %agent, run_id = %run.id, iteration, status = %run.status, "run polled");

            if run.status == RunStatus::RequiresAction {
                if run.tool_calls.is_empty() {
                    tracing::warn!(agent = %agent, run_id = %run.id, "requires_action without tool calls");
                    continue;
                }
                let outputs = self
                    .dispatch_batch(agent, &run.tool_calls, correlation_id, mutation.as_deref())
                    .await;
                run = self.client.submit_tool_outputs(session, &run.id, &outputs).await?;
            }
        }

        self.finish(agent, session, run, iteration, context).await
    }

    async fn dispatch_batch(
        &self,
        agent: &AgentId,
        calls: &[ToolCallRequest],
        correlation_id: &str,
        mutation_id: Option<&str>,
    ) -> Vec<ToolOutput> {
        tracing::info!(agent = %agent, batch = calls.len(), "dispatching tool calls");
        let futures = calls.iter().map(|call| async move {
            let outcome = self
                .dispatcher
                .invoke(agent, &call.name, call.arguments.clone(), correlation_id, mutation_id)
                .await;
            ToolOutput {
                tool_call_id: call.id.clone(),
                output: outcome.to_output_string(),
            }
        });
        join_all(futures).await
    }

    async fn finish(
        &self,
        agent: &AgentId,
        session: &AgentSession,
        run: RunSnapshot,
        iteration: u32,
        context: &Context,
    ) -> Result<AgentResult, LlmError> {
        let result = match run.status {
            RunStatus::Completed => match self.client.last_assistant_message(session).await? {
                Some(text) => AgentResult::completed(agent.as_str(), text, context.clone()),
                None => AgentResult::error(agent.as_str(), NO_RESPONSE_MESSAGE, context.clone()),
            },
            status if status.is_active() => {
                tracing::warn!(agent = %agent, run_id = %run.id, iteration, "run timed out");
                AgentResult::error(
                    agent.as_str(),
                    format!("run timed out after {iteration} polls"),
                    context.clone(),
                )
            }
            status => {
                let message = run
                    .last_error
                    .unwrap_or_else(|| format!("run ended with status {status}"));
                tracing::warn!(agent = %agent, run_id = %run.id, %status, error = %message, "run did not complete");
                AgentResult::error(agent.as_str(), message, context.clone())
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::audit::AuditLedger;
    use crate::llm::{AgentSpec, MockBackend, MockPoll, MockRun, ReasoningBackend};
    use crate::tools::{GenerateReportTool, ToolRegistry};

    struct Harness {
        _dir: TempDir,
        mock: Arc<MockBackend>,
        driver: RunDriver,
        ledger: AuditLedger,
    }

    fn harness(max_iterations: u32) -> Harness {
        let dir = TempDir::new().unwrap();
        let ledger = AuditLedger::new(dir.path().join("audit.csv"), 1 << 20);
        let mut reg = ToolRegistry::new();
        reg.register(GenerateReportTool);
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(reg), ledger.clone(), 5, 3));
        let mock = Arc::new(MockBackend::new());
        let driver = RunDriver::new(mock.clone(), dispatcher, Duration::from_millis(1), max_iterations);
        Harness {
            _dir: dir,
            mock,
            driver,
            ledger,
        }
    }

    async fn session(h: &Harness, agent: &str) -> AgentSession {
        h.mock
            .create_session(&AgentSpec {
                name: agent.to_string(),
                model: "mock".to_string(),
                instructions: String::new(),
                tool_specs: Vec::new(),
                temperature: 0.0,
            })
            .await
            .unwrap()
    }

    fn ctx() -> Context {
        json!({"mutation_id": "1001"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_completed_returns_reply() {
        let h = harness(60);
        h.mock.script("AdvisoryAgent", MockRun::reply("Looks fine."));
        let s = session(&h, "AdvisoryAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("AdvisoryAgent"), &s, "review", &ctx(), "c1")
            .await;
        assert!(r.is_completed());
        assert_eq!(r.response.as_deref(), Some("Looks fine."));
        assert_eq!(h.mock.posted_messages("AdvisoryAgent"), vec!["review".to_string()]);
    }

    #[tokio::test]
    async fn test_times_out_after_exactly_max_iterations() {
        let h = harness(60);
        h.mock.script("InvestigationAgent", MockRun::stuck());
        let s = session(&h, "InvestigationAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("InvestigationAgent"), &s, "go", &ctx(), "c1")
            .await;
        assert!(!r.is_completed());
        assert_eq!(r.error_message(), "run timed out after 60 polls");
        assert_eq!(h.mock.get_run_calls(), 60);
    }

    #[tokio::test]
    async fn test_completed_without_message() {
        let h = harness(10);
        h.mock.script("RightsCheckAgent", MockRun::silent());
        let s = session(&h, "RightsCheckAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("RightsCheckAgent"), &s, "go", &ctx(), "c1")
            .await;
        assert_eq!(r.error_message(), NO_RESPONSE_MESSAGE);
    }

    #[tokio::test]
    async fn test_failed_carries_last_error() {
        let h = harness(10);
        h.mock.script("RightsCheckAgent", MockRun::failed("rate limit exceeded"));
        let s = session(&h, "RightsCheckAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("RightsCheckAgent"), &s, "go", &ctx(), "c1")
            .await;
        assert_eq!(r.error_message(), "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_transport_error_becomes_error_result() {
        let h = harness(10);
        h.mock.script(
            "RightsCheckAgent",
            MockRun::reply("never").then(MockPoll::TransportError("connection reset".into())),
        );
        let s = session(&h, "RightsCheckAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("RightsCheckAgent"), &s, "go", &ctx(), "c1")
            .await;
        assert!(r.error_message().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_tool_calls_dispatched_and_submitted_as_one_batch() {
        let h = harness(10);
        h.mock.script(
            "AdvisoryAgent",
            MockRun::reply("Report RPT ready.").with_tool_calls(vec![
                ToolCallRequest {
                    id: "call_1".into(),
                    name: "generate_report".into(),
                    arguments: json!({"mutation_id": "1001", "context": {}}),
                },
                ToolCallRequest {
                    id: "call_2".into(),
                    name: "missing_tool".into(),
                    arguments: json!({}),
                },
            ]),
        );
        let s = session(&h, "AdvisoryAgent").await;
        let r = h
            .driver
            .drive(&AgentId::from("AdvisoryAgent"), &s, "go", &ctx(), "hop-1")
            .await;
        assert!(r.is_completed());

        let batches = h.mock.submitted();
        assert_eq!(batches.len(), 1);
        let outputs = &batches[0].1;
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].tool_call_id, "call_1");
        assert!(outputs[0].output.contains("RPT-1001-"));
        let err: serde_json::Value = serde_json::from_str(&outputs[1].output).unwrap();
        assert_eq!(err["retries"], 1);

        // 每次工具尝试一条审计记录，业务主键取自案件上下文
        let rows = h.ledger.query("1001").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.correlation_id().as_deref() == Some("hop-1")));
    }
}
