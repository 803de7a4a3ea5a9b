//! 内置智能体定义：标识、指令、可用工具与提示词构造

use serde_json::Value;

use crate::protocol::{AgentId, Context};

/// 一个模型驱动智能体的静态定义
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: AgentId,
    pub instructions: String,
    /// 注册表中的工具名
    pub tools: Vec<String>,
    /// 提示词开头的任务说明
    pub task: String,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<AgentId>,
        instructions: impl Into<String>,
        tools: &[&str],
        task: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            task: task.into(),
        }
    }

    pub fn investigation() -> Self {
        Self::new(
            AgentId::INVESTIGATION,
            "You are the Investigation Agent for HR mutations. Use lookup_data to gather the mutation record, \
             the affected user, their manager and any absence data. Report the facts you found and anything unusual.",
            &["lookup_data"],
            "Investigate the following HR mutation.",
        )
    }

    pub fn rights_check() -> Self {
        Self::new(
            AgentId::RIGHTS_CHECK,
            "You are the Rights Check Agent. Use check_authorization and lookup_data to verify that every access \
             change in the mutation is backed by an authorisation or a role authorisation.",
            &["check_authorization", "lookup_data"],
            "Check the access rights involved in the following HR mutation.",
        )
    }

    pub fn request_for_information() -> Self {
        Self::new(
            AgentId::REQUEST_FOR_INFORMATION,
            "You are the Request for Information Agent. Use notify_send to ask the named recipient for a \
             justification of the change, and lookup_data to validate their claims. Always pass the mutation_id \
             in the notification context.",
            &["notify_send", "lookup_data"],
            "Request information about the following HR mutation.",
        )
    }

    pub fn advisory() -> Self {
        Self::new(
            AgentId::ADVISORY,
            "You are the HR Advisory Agent. Combine the findings of the previous agents and use generate_report \
             to produce the advisory report with a clear recommendation.",
            &["generate_report", "lookup_data"],
            "Write the advisory report for the following HR mutation.",
        )
    }

    /// 流水线用到的全部内置定义
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::investigation(),
            Self::rights_check(),
            Self::request_for_information(),
            Self::advisory(),
        ]
    }

    /// 任务说明 + 针对信息请求的收件人说明 + 完整上下文 JSON
    pub fn build_prompt(&self, context: &Context) -> String {
        let mut prompt = self.task.clone();
        if let Some(subject) = context.get("rfi_subject").and_then(Value::as_str) {
            let recipient = context
                .get("recipient_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            prompt.push_str(&format!(
                "\nAsk the {subject} (recipient_id: {recipient}) why this change was made."
            ));
        }
        let body = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(&body);
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_ids_and_tools() {
        let defs = AgentDefinition::builtin();
        assert_eq!(defs.len(), 4);
        assert!(defs.iter().all(|d| d.id.is_builtin_agent()));
        assert_eq!(AgentDefinition::rights_check().tools, vec!["check_authorization", "lookup_data"]);
    }

    #[test]
    fn test_prompt_includes_context_and_recipient() {
        let ctx = json!({"mutation_id": "1001", "rfi_subject": "manager", "recipient_id": "m001"})
            .as_object()
            .cloned()
            .unwrap();
        let p = AgentDefinition::request_for_information().build_prompt(&ctx);
        assert!(p.starts_with("Request information"));
        assert!(p.contains("Ask the manager (recipient_id: m001)"));
        assert!(p.contains("\"mutation_id\": \"1001\""));
    }
}
