//! 工具分发器
//!
//! 持有 ToolRegistry、审计账本与单次调用超时。invoke 对一次 tool call 做有界重试：
//! 每次尝试写一条审计记录（失败为 error + retry_count，成功为 success），并输出结构化 tool_audit 日志；
//! 重试耗尽返回带内错误值，从不向调用方抛出 Rust 错误。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::audit::AuditLedger;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::protocol::{AgentId, Context, Envelope, EnvelopeError, MessageStatus};
use crate::tools::ToolRegistry;

/// 一次 tool call 的最终结果：成功值原样返回；失败为 `{error, retries}`
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Ok(Value),
    Err { error: String, retries: u32 },
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Ok(v) => v.clone(),
            Self::Err { error, retries } => json!({ "error": error, "retries": retries }),
        }
    }

    /// 提交给推理后端的 output 字符串：字符串值原样，其它 JSON 序列化
    pub fn to_output_string(&self) -> String {
        match self {
            Self::Ok(Value::String(s)) => s.clone(),
            other => other.to_value().to_string(),
        }
    }
}

/// 工具分发器：超时 + 有界重试 + 每次尝试一条审计记录
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    ledger: AuditLedger,
    timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, ledger: AuditLedger, timeout_secs: u64, max_attempts: u32) -> Self {
        Self {
            registry,
            ledger,
            timeout: Duration::from_secs(timeout_secs),
            recovery: RecoveryEngine::new(max_attempts),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 调用一次工具（mutation_id 只用于审计记录的业务主键）
    pub async fn invoke(
        &self,
        agent: &AgentId,
        tool_name: &str,
        args: Value,
        correlation_id: &str,
        mutation_id: Option<&str>,
    ) -> ToolOutcome {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.execute_once(tool_name, args.clone()).await {
                Ok(value) => {
                    self.audit(agent, tool_name, &args, correlation_id, mutation_id, None)
                        .await;
                    return ToolOutcome::Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    self.audit(
                        agent,
                        tool_name,
                        &args,
                        correlation_id,
                        mutation_id,
                        Some(EnvelopeError::new(message.clone(), attempt)),
                    )
                    .await;
                    match self.recovery.handle(&err, attempt) {
                        RecoveryAction::Retry => {
                            tracing::warn!(
                                agent = %agent,
                                tool = tool_name,
                                attempt,
                                error = %message,
                                "tool call failed, retrying"
                            );
                        }
                        RecoveryAction::Escalate(_) | RecoveryAction::Abort => {
                            tracing::error!(
                                agent = %agent,
                                tool = tool_name,
                                retries = attempt,
                                error = %message,
                                "tool call gave up"
                            );
                            return ToolOutcome::Err {
                                error: message,
                                retries: attempt,
                            };
                        }
                    }
                }
            }
        }
    }

    /// 单次执行：未知工具返回 HallucinatedTool，超时返回 ToolTimeout，工具 Err 转为 ToolExecutionFailed；输出 JSON 审计日志
    async fn execute_once(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::HallucinatedTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    async fn audit(
        &self,
        agent: &AgentId,
        tool_name: &str,
        args: &Value,
        correlation_id: &str,
        mutation_id: Option<&str>,
        error: Option<EnvelopeError>,
    ) {
        let mut ctx = Context::new();
        if let Some(m) = mutation_id {
            ctx.insert("mutation_id".into(), Value::String(m.to_string()));
        }
        ctx.insert("tool".into(), Value::String(tool_name.to_string()));
        ctx.insert("arguments".into(), args.clone());

        let builder = Envelope::builder(agent, AgentId::tool_call(), tool_name, ctx)
            .correlation_id(Some(correlation_id.to_string()));
        let envelope = match error {
            Some(e) => builder.status(MessageStatus::Error).error(e).build(),
            None => builder.status(MessageStatus::Success).build(),
        };
        if let Err(e) = self.ledger.record_async(&envelope).await {
            tracing::error!(tool = tool_name, error = %e, "failed to write tool audit record");
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    use crate::tools::Tool;

    /// 前 fail_times 次失败，之后成功
    struct Flaky {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "fails a few times"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err(format!("failure {n}"))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn dispatcher(dir: &TempDir, fail_times: u32) -> (ToolDispatcher, Arc<AtomicU32>, AuditLedger) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(Flaky {
            fail_times,
            calls: calls.clone(),
        });
        let ledger = AuditLedger::new(dir.path().join("audit.csv"), 1 << 20);
        (ToolDispatcher::new(Arc::new(reg), ledger.clone(), 5, 3), calls, ledger)
    }

    #[tokio::test]
    async fn test_success_after_k_failures() {
        for k in 0..3u32 {
            let dir = TempDir::new().unwrap();
            let (d, calls, ledger) = dispatcher(&dir, k);
            let out = d
                .invoke(&AgentId::from("InvestigationAgent"), "flaky", json!({}), "corr-1", Some("M1"))
                .await;
            assert_eq!(out, ToolOutcome::Ok(json!({"ok": true})));
            assert_eq!(calls.load(Ordering::SeqCst), k + 1);

            let rows = ledger.query("M1").unwrap();
            assert_eq!(rows.len() as u32, k + 1);
            for (i, row) in rows.iter().take(k as usize).enumerate() {
                assert_eq!(row.new_status, "error");
                assert_eq!(row.comment_json().unwrap()["error"]["retry_count"], i as u64 + 1);
            }
            assert_eq!(rows.last().unwrap().new_status, "success");
            assert!(rows.iter().all(|r| r.correlation_id().as_deref() == Some("corr-1")));
        }
    }

    #[tokio::test]
    async fn test_always_failing_gives_up_after_three() {
        let dir = TempDir::new().unwrap();
        let (d, calls, ledger) = dispatcher(&dir, u32::MAX);
        let out = d
            .invoke(&AgentId::from("RightsCheckAgent"), "flaky", json!({"mutation_id": "M2"}), "c", None)
            .await;
        match &out {
            ToolOutcome::Err { error, retries } => {
                assert_eq!(*retries, 3);
                assert!(error.contains("failure 3"));
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // mutation_id 从 arguments 中找到
        let rows = ledger.query("M2").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.new_status == "error" && r.agent == "RightsCheckAgent"));
        assert_eq!(out.to_value()["retries"], 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_once() {
        let dir = TempDir::new().unwrap();
        let (d, _calls, ledger) = dispatcher(&dir, 0);
        let out = d
            .invoke(&AgentId::from("AdvisoryAgent"), "no_such_tool", json!({}), "c", Some("M3"))
            .await;
        assert!(matches!(out, ToolOutcome::Err { retries: 1, .. }));
        assert_eq!(ledger.query("M3").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let dir = TempDir::new().unwrap();
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        let ledger = AuditLedger::new(dir.path().join("audit.csv"), 1 << 20);
        let mut d = ToolDispatcher::new(Arc::new(reg), ledger.clone(), 1, 2);
        d.timeout = Duration::from_millis(10);
        let out = d
            .invoke(&AgentId::from("AdvisoryAgent"), "slow", json!({}), "c", Some("M4"))
            .await;
        assert!(matches!(out, ToolOutcome::Err { retries: 2, .. }));
        assert_eq!(ledger.query("M4").unwrap().len(), 2);
    }

    #[test]
    fn test_output_string() {
        assert_eq!(ToolOutcome::Ok(json!("plain")).to_output_string(), "plain");
        assert_eq!(ToolOutcome::Ok(json!({"a": 1})).to_output_string(), r#"{"a":1}"#);
        let err = ToolOutcome::Err {
            error: "x".into(),
            retries: 3,
        };
        assert_eq!(err.to_value(), json!({"error": "x", "retries": 3}));
    }
}
