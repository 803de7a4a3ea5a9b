//! OpenAI 兼容 Assistants v2 REST 客户端
//!
//! 通过 reqwest 调用 /assistants、/threads、/threads/{id}/runs 等端点（可配置 base_url）；
//! 鉴权支持 `Authorization: Bearer`（OpenAI / 自建代理）与 `api-key` 头 + api-version 查询参数（Azure 风格）。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};

use crate::llm::{AgentSession, AgentSpec, LlmError, ReasoningBackend, RunSnapshot, ToolCallRequest, ToolOutput};
use crate::run::RunStatus;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthHeader {
    Bearer,
    ApiKey,
}

/// Assistants 后端：持有 HTTP Client、端点与凭据
pub struct AssistantsBackend {
    client: Client,
    base_url: String,
    api_key: String,
    auth: AuthHeader,
    api_version: Option<String>,
}

impl AssistantsBackend {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        auth_header: &str,
        api_version: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let auth = if auth_header.eq_ignore_ascii_case("api-key") {
            AuthHeader::ApiKey
        } else {
            AuthHeader::Bearer
        };
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            auth,
            api_version: api_version.map(String::from),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut rb = self
            .client
            .request(method, url)
            .header("OpenAI-Beta", "assistants=v2");
        rb = match self.auth {
            AuthHeader::Bearer => rb.bearer_auth(&self.api_key),
            AuthHeader::ApiKey => rb.header("api-key", &self.api_key),
        };
        if let Some(v) = &self.api_version {
            rb = rb.query(&[("api-version", v.as_str())]);
        }
        rb
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Value, LlmError> {
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, LlmError> {
        self.send(self.request(Method::POST, path).json(&body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, LlmError> {
        self.send(self.request(Method::GET, path)).await
    }
}

fn id_of(v: &Value) -> Result<String, LlmError> {
    v["id"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| LlmError::Decode(format!("missing id in {v}")))
}

/// 把 run 对象解析为快照；requires_action 时取出全部 function tool call
pub fn parse_run(v: &Value) -> Result<RunSnapshot, LlmError> {
    let id = id_of(v)?;
    let status: RunStatus = serde_json::from_value(v["status"].clone())
        .map_err(|e| LlmError::Decode(format!("run status: {e}")))?;

    let tool_calls = v["required_action"]["submit_tool_outputs"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let id = c["id"].as_str()?.to_string();
                    let name = c["function"]["name"].as_str()?.to_string();
                    let raw = c["function"]["arguments"].as_str().unwrap_or("{}");
                    let arguments = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                    Some(ToolCallRequest { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let last_error = match &v["last_error"] {
        Value::Null => None,
        Value::Object(e) => Some(
            e.get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| Value::Object(e.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    };

    Ok(RunSnapshot {
        id,
        status,
        tool_calls,
        last_error,
    })
}

/// 按 order=desc 返回的消息列表里第一条 assistant 消息的全部 text 片段
pub fn first_assistant_text(list: &Value) -> Option<String> {
    let msg = list["data"]
        .as_array()?
        .iter()
        .find(|m| m["role"] == "assistant")?;
    let parts: Vec<&str> = msg["content"]
        .as_array()?
        .iter()
        .filter(|c| c["type"] == "text")
        .filter_map(|c| c["text"]["value"].as_str())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[async_trait]
impl ReasoningBackend for AssistantsBackend {
    async fn create_session(&self, spec: &AgentSpec) -> Result<AgentSession, LlmError> {
        let tools: Vec<Value> = spec
            .tool_specs
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let assistant = self
            .post(
                "assistants",
                json!({
                    "model": spec.model,
                    "name": spec.name,
                    "instructions": spec.instructions,
                    "temperature": spec.temperature,
                    "tools": tools,
                }),
            )
            .await?;
        let thread = self.post("threads", json!({})).await?;
        let session = AgentSession {
            assistant_id: id_of(&assistant)?,
            thread_id: id_of(&thread)?,
        };
        tracing::info!(
            agent = %spec.name,
            assistant_id = %session.assistant_id,
            thread_id = %session.thread_id,
            "assistant session created"
        );
        Ok(session)
    }

    async fn post_message(&self, session: &AgentSession, content: &str) -> Result<(), LlmError> {
        self.post(
            &format!("threads/{}/messages", session.thread_id),
            json!({ "role": "user", "content": content }),
        )
        .await?;
        Ok(())
    }

    async fn create_run(&self, session: &AgentSession) -> Result<RunSnapshot, LlmError> {
        let run = self
            .post(
                &format!("threads/{}/runs", session.thread_id),
                json!({ "assistant_id": session.assistant_id }),
            )
            .await?;
        parse_run(&run)
    }

    async fn get_run(&self, session: &AgentSession, run_id: &str) -> Result<RunSnapshot, LlmError> {
        let run = self
            .get(&format!("threads/{}/runs/{}", session.thread_id, run_id))
            .await?;
        parse_run(&run)
    }

    async fn submit_tool_outputs(
        &self,
        session: &AgentSession,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunSnapshot, LlmError> {
        let run = self
            .post(
                &format!(
                    "threads/{}/runs/{}/submit_tool_outputs",
                    session.thread_id, run_id
                ),
                json!({ "tool_outputs": outputs }),
            )
            .await?;
        parse_run(&run)
    }

    async fn last_assistant_message(&self, session: &AgentSession) -> Result<Option<String>, LlmError> {
        let list = self
            .get(&format!(
                "threads/{}/messages?order=desc&limit=20",
                session.thread_id
            ))
            .await?;
        Ok(first_assistant_text(&list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requires_action() {
        let run = json!({
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "lookup_data", "arguments": "{\"file\":\"users\",\"query\":{}}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "broken", "arguments": "not json"}}
                    ]
                }
            },
            "last_error": null
        });
        let snap = parse_run(&run).unwrap();
        assert_eq!(snap.status, RunStatus::RequiresAction);
        assert_eq!(snap.tool_calls.len(), 2);
        assert_eq!(snap.tool_calls[0].arguments["file"], "users");
        assert_eq!(snap.tool_calls[1].arguments, json!("not json"));
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_parse_failed_with_error() {
        let run = json!({
            "id": "run_2",
            "status": "failed",
            "last_error": {"code": "server_error", "message": "Sorry, something went wrong."}
        });
        let snap = parse_run(&run).unwrap();
        assert_eq!(snap.status, RunStatus::Failed);
        assert_eq!(snap.last_error.as_deref(), Some("Sorry, something went wrong."));
    }

    #[test]
    fn test_first_assistant_text() {
        let list = json!({"data": [
            {"role": "assistant", "content": [
                {"type": "text", "text": {"value": "line one"}},
                {"type": "text", "text": {"value": "line two"}}
            ]},
            {"role": "user", "content": [{"type": "text", "text": {"value": "hi"}}]}
        ]});
        assert_eq!(first_assistant_text(&list).as_deref(), Some("line one\nline two"));
        assert!(first_assistant_text(&json!({"data": []})).is_none());
    }

    #[test]
    fn test_base_url_trimmed() {
        let b = AssistantsBackend::new(Some("http://localhost:8080/v1/"), "k", "api-key", Some("2024-05-01-preview"), 5)
            .unwrap();
        assert_eq!(b.base_url, "http://localhost:8080/v1");
        assert_eq!(b.auth, AuthHeader::ApiKey);
    }
}
