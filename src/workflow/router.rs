//! A2A 路由：把上下文交给指定智能体，失败重试，耗尽后升级
//!
//! 每次尝试写一条应答记录（completed / retry / error），耗尽后再写一条 escalated 记录；
//! 同一次路由的全部记录共享调用方给出的 correlation_id。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::agents::Agent;
use crate::audit::{AuditLedger, AuditRecord};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, ESCALATION_MESSAGE};
use crate::protocol::{AgentId, Context, Envelope, EnvelopeError, MessageStatus};
use crate::workflow::types::{Escalation, RouteOutcome};

/// 委派时的动作名
pub const HANDLE_REQUEST: &str = "handle_request";

pub struct Orchestrator {
    agents: HashMap<String, Arc<dyn Agent>>,
    ledger: AuditLedger,
    recovery: RecoveryEngine,
}

impl Orchestrator {
    pub fn new(ledger: AuditLedger, max_retries: u32) -> Self {
        Self {
            agents: HashMap::new(),
            ledger,
            recovery: RecoveryEngine::new(max_retries),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.id().to_string(), agent);
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn max_retries(&self) -> u32 {
        self.recovery.max_attempts()
    }

    /// 路由到 agent；未知智能体写一条 error 记录后立即返回 UnknownAgent
    pub async fn route(
        &self,
        agent: &str,
        context: &Context,
        delegator: &AgentId,
        correlation_id: &str,
    ) -> Result<RouteOutcome, AgentError> {
        let Some(handler) = self.agent(agent) else {
            let err = AgentError::UnknownAgent(agent.to_string());
            let rejected = Envelope::builder(delegator, agent, HANDLE_REQUEST, context.clone())
                .status(MessageStatus::Error)
                .correlation_id(Some(correlation_id.to_string()))
                .error(EnvelopeError::new(err.to_string(), 0))
                .build();
            if let Err(e) = self
                .ledger
                .append_async(AuditRecord::from_envelope(&rejected).with_old_status(MessageStatus::Pending.as_str()))
                .await
            {
                tracing::error!(agent, error = %e, "failed to write audit record for unknown agent");
            }
            tracing::error!(agent, delegator = %delegator, correlation_id, "routing to unknown agent");
            return Err(err);
        };
        let responder = handler.id().clone();
        let reply_action = format!("{HANDLE_REQUEST}_result");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tracing::info!(agent = %responder, delegator = %delegator, correlation_id, attempt, "routing");
            let result = handler.handle(context, correlation_id).await?;

            if result.is_completed() {
                let reply = Envelope::builder(&responder, delegator, reply_action.as_str(), context.clone())
                    .status(MessageStatus::Completed)
                    .correlation_id(Some(correlation_id.to_string()))
                    .build();
                let reasoning = json!({ "response": result.response });
                self.ledger
                    .append_async(
                        AuditRecord::from_envelope(&reply)
                            .with_old_status(MessageStatus::Pending.as_str())
                            .with_reasoning(&reasoning),
                    )
                    .await?;
                return Ok(RouteOutcome::Completed(result));
            }

            let message = result.error_message().to_string();
            let failure = AgentError::StageFailed {
                agent: responder.to_string(),
                message: message.clone(),
            };

            if self.recovery.handle(&failure, attempt) == RecoveryAction::Retry {
                tracing::warn!(agent = %responder, attempt, error = %message, "agent attempt failed, retrying");
                let mut ctx = context.clone();
                ctx.insert(
                    "comment".into(),
                    json!({ "message": message, "retry_count": attempt }),
                );
                let reply = Envelope::builder(&responder, delegator, reply_action.as_str(), ctx)
                    .status(MessageStatus::Retry)
                    .correlation_id(Some(correlation_id.to_string()))
                    .build();
                self.ledger
                    .append_async(AuditRecord::from_envelope(&reply).with_old_status(MessageStatus::Pending.as_str()))
                    .await?;
                continue;
            }

            // 最后一次失败
            let reply = Envelope::builder(&responder, delegator, reply_action.as_str(), context.clone())
                .status(MessageStatus::Error)
                .correlation_id(Some(correlation_id.to_string()))
                .error(EnvelopeError::new(message.clone(), attempt))
                .build();
            self.ledger
                .append_async(AuditRecord::from_envelope(&reply).with_old_status(MessageStatus::Pending.as_str()))
                .await?;

            tracing::error!(
                agent = %responder,
                attempts = attempt,
                error = %message,
                "agent failed repeatedly, escalating to manual intervention"
            );
            let mut ctx = context.clone();
            ctx.insert("comment".into(), json!(ESCALATION_MESSAGE));
            let escalated = reply
                .follow_up(&responder, delegator, format!("{HANDLE_REQUEST}_escalation"), ctx)
                .status(MessageStatus::Escalated)
                .error(EnvelopeError::new(message.clone(), attempt))
                .build();
            self.ledger
                .append_async(AuditRecord::from_envelope(&escalated).with_old_status(MessageStatus::Error.as_str()))
                .await?;

            return Ok(RouteOutcome::Escalated(Escalation {
                agent: responder.to_string(),
                error: message,
                attempts: attempt,
                escalation: ESCALATION_MESSAGE.to_string(),
                correlation_id: correlation_id.to_string(),
                context: context.clone(),
            }));
        }
    }
}
