//! 五阶段流水线
//!
//! Investigation → RightsCheck → RFI(user) → RFI(manager) → Advisory。
//! 每一跳：委派方写 pending 委派记录，route 写应答记录，委派方写 success 确认记录；
//! 每跳一个新的 correlation_id。某一阶段升级即停止（严格策略）。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::audit::{extract_mutation_id, AuditRecord};
use crate::core::AgentError;
use crate::protocol::{AgentId, Context, Envelope, MessageStatus};
use crate::workflow::router::{Orchestrator, HANDLE_REQUEST};
use crate::workflow::types::{PipelineOutcome, PipelineStatus, RouteOutcome, Stage, StageEscalation};

pub struct Pipeline {
    orchestrator: Arc<Orchestrator>,
}

impl Pipeline {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 以初始上下文跑完整条流水线
    pub async fn run(&self, initial: Context) -> Result<PipelineOutcome, AgentError> {
        let mutation_id = extract_mutation_id(&initial);
        let mut accumulated = initial;
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut delegator = AgentId::orchestrator();

        tracing::info!(mutation_id = %mutation_id, "pipeline started");

        for stage in Stage::ALL {
            let agent = AgentId::from(stage.agent());
            let context = stage_context(stage, &accumulated);
            let correlation_id = uuid::Uuid::new_v4().to_string();

            let delegation = Envelope::builder(&delegator, &agent, HANDLE_REQUEST, context.clone())
                .correlation_id(Some(correlation_id.clone()))
                .build();
            self.orchestrator
                .ledger()
                .append_async(AuditRecord::from_envelope(&delegation))
                .await?;

            let outcome = self
                .orchestrator
                .route(agent.as_str(), &context, &delegator, &correlation_id)
                .await?;

            let result = match outcome {
                RouteOutcome::Completed(result) => result,
                RouteOutcome::Escalated(detail) => {
                    tracing::error!(
                        mutation_id = %mutation_id,
                        stage = %stage,
                        agent = %agent,
                        "pipeline halted by escalation"
                    );
                    return Ok(PipelineOutcome {
                        status: PipelineStatus::Escalated,
                        mutation_id,
                        stages,
                        escalation: Some(StageEscalation { stage, detail }),
                        context: accumulated,
                    });
                }
            };

            let confirmation = delegation
                .follow_up(
                    &delegator,
                    &agent,
                    format!("received_{}", stage.result_key()),
                    context,
                )
                .status(MessageStatus::Success)
                .build();
            self.orchestrator
                .ledger()
                .append_async(
                    AuditRecord::from_envelope(&confirmation).with_old_status(MessageStatus::Completed.as_str()),
                )
                .await?;

            tracing::info!(mutation_id = %mutation_id, stage = %stage, correlation_id = %correlation_id, "stage completed");
            accumulated.insert(stage.result_key().to_string(), result.summary());
            stages.push((stage, result));
            delegator = agent;
        }

        tracing::info!(mutation_id = %mutation_id, "pipeline completed");
        Ok(PipelineOutcome {
            status: PipelineStatus::Completed,
            mutation_id,
            stages,
            escalation: None,
            context: accumulated,
        })
    }
}

/// 阶段输入：累积上下文，信息请求阶段另加 rfi_subject 与 recipient_id
fn stage_context(stage: Stage, accumulated: &Context) -> Context {
    let mut ctx = accumulated.clone();
    if let Some(subject) = stage.rfi_subject() {
        ctx.insert("rfi_subject".into(), json!(subject));
        if let Some(recipient) = find_recipient(accumulated, stage.recipient_keys()) {
            ctx.insert("recipient_id".into(), json!(recipient));
        }
    }
    ctx
}

/// 按候选键优先级查找收件人：先顶层，再深度优先查嵌套对象
fn find_recipient(ctx: &Context, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| ctx.get(*k).and_then(non_empty))
        .or_else(|| {
            ctx.values().find_map(|v| match v {
                Value::Object(inner) => find_recipient(inner, keys),
                _ => None,
            })
        })
}

fn non_empty(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(v: Value) -> Context {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_stage_context_adds_rfi_fields() {
        let acc = ctx(json!({"mutation_id": "1001", "ChangedFor": "u-17", "manager_id": "m-3"}));
        let user = stage_context(Stage::InformationUser, &acc);
        assert_eq!(user["rfi_subject"], "user");
        assert_eq!(user["recipient_id"], "u-17");

        let manager = stage_context(Stage::InformationManager, &acc);
        assert_eq!(manager["recipient_id"], "m-3");

        let plain = stage_context(Stage::RightsCheck, &acc);
        assert_eq!(plain, acc);
    }

    #[test]
    fn test_recipient_found_in_nested_record() {
        let acc = ctx(json!({"mutation": {"UserID": 42, "Manager": " "}}));
        assert_eq!(find_recipient(&acc, Stage::InformationUser.recipient_keys()).as_deref(), Some("42"));
        assert_eq!(find_recipient(&acc, Stage::InformationManager.recipient_keys()), None);
    }
}
