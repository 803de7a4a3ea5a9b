//! Mock 推理后端（用于测试，无需 API）
//!
//! 每个智能体可预置若干「run 脚本」：每次 get_run 依次吐出脚本中的一步，脚本走完即 completed，
//! 并把脚本的回复写成 thread 上最新的助手消息。没有脚本时 run 立即完成，回复一句确认文本，
//! 便于本地跑通整条流水线。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{AgentSession, AgentSpec, LlmError, ReasoningBackend, RunSnapshot, ToolCallRequest, ToolOutput};
use crate::run::RunStatus;

/// 一次 get_run 的结果
#[derive(Debug, Clone)]
pub enum MockPoll {
    Status(RunStatus),
    RequiresAction(Vec<ToolCallRequest>),
    Failed(String),
    TransportError(String),
}

/// 一次 run 的脚本
#[derive(Debug, Clone)]
pub struct MockRun {
    polls: VecDeque<MockPoll>,
    reply: Option<String>,
    /// 脚本走完后一直停留在该状态（用于超时测试）
    stuck_in: Option<RunStatus>,
}

impl MockRun {
    /// 立即完成并回复 reply
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            polls: VecDeque::new(),
            reply: Some(reply.into()),
            stuck_in: None,
        }
    }

    /// 完成但 thread 上没有助手消息
    pub fn silent() -> Self {
        Self {
            polls: VecDeque::new(),
            reply: None,
            stuck_in: None,
        }
    }

    /// 永远停在 in_progress
    pub fn stuck() -> Self {
        Self {
            polls: VecDeque::new(),
            reply: None,
            stuck_in: Some(RunStatus::InProgress),
        }
    }

    pub fn failed(last_error: impl Into<String>) -> Self {
        Self::silent().then(MockPoll::Failed(last_error.into()))
    }

    /// 在完成之前先经过一步
    pub fn then(mut self, poll: MockPoll) -> Self {
        self.polls.push_back(poll);
        self
    }

    /// 先请求一批工具调用，再完成
    pub fn with_tool_calls(self, calls: Vec<ToolCallRequest>) -> Self {
        self.then(MockPoll::Status(RunStatus::InProgress))
            .then(MockPoll::RequiresAction(calls))
    }
}

#[derive(Debug)]
struct ThreadState {
    agent: String,
    run: Option<(String, MockRun)>,
    last_reply: Option<String>,
    posted: Vec<String>,
}

/// 脚本化的 Mock 后端
#[derive(Debug, Default)]
pub struct MockBackend {
    scripts: Mutex<HashMap<String, VecDeque<MockRun>>>,
    threads: Mutex<HashMap<String, ThreadState>>,
    submitted: Mutex<Vec<(String, Vec<ToolOutput>)>>,
    next_id: AtomicU32,
    get_run_calls: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某个智能体追加一次 run 的脚本（按 create_run 顺序消费）
    pub fn script(&self, agent: &str, run: MockRun) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        scripts.entry(agent.to_string()).or_default().push_back(run);
    }

    pub fn get_run_calls(&self) -> u32 {
        self.get_run_calls.load(Ordering::SeqCst)
    }

    /// 所有 submit_tool_outputs 批次（run_id, outputs）
    pub fn submitted(&self) -> Vec<(String, Vec<ToolOutput>)> {
        self.submitted.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 某个智能体收到的全部用户消息
    pub fn posted_messages(&self, agent: &str) -> Vec<String> {
        let threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        threads
            .values()
            .filter(|t| t.agent == agent)
            .flat_map(|t| t.posted.clone())
            .collect()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn with_thread<T>(
        &self,
        session: &AgentSession,
        f: impl FnOnce(&mut ThreadState) -> Result<T, LlmError>,
    ) -> Result<T, LlmError> {
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        let thread = threads
            .get_mut(&session.thread_id)
            .ok_or_else(|| LlmError::Decode(format!("unknown thread {}", session.thread_id)))?;
        f(thread)
    }
}

fn snapshot(id: &str, status: RunStatus) -> RunSnapshot {
    RunSnapshot {
        id: id.to_string(),
        status,
        tool_calls: Vec::new(),
        last_error: None,
    }
}

#[async_trait]
impl ReasoningBackend for MockBackend {
    async fn create_session(&self, spec: &AgentSpec) -> Result<AgentSession, LlmError> {
        let session = AgentSession {
            assistant_id: self.next("asst"),
            thread_id: self.next("thread"),
        };
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        threads.insert(
            session.thread_id.clone(),
            ThreadState {
                agent: spec.name.clone(),
                run: None,
                last_reply: None,
                posted: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn post_message(&self, session: &AgentSession, content: &str) -> Result<(), LlmError> {
        self.with_thread(session, |t| {
            t.posted.push(content.to_string());
            Ok(())
        })
    }

    async fn create_run(&self, session: &AgentSession) -> Result<RunSnapshot, LlmError> {
        let run_id = self.next("run");
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        self.with_thread(session, |t| {
            let run = scripts
                .get_mut(&t.agent)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| MockRun::reply(format!("{} reviewed the case.", t.agent)));
            t.run = Some((run_id.clone(), run));
            Ok(snapshot(&run_id, RunStatus::Queued))
        })
    }

    async fn get_run(&self, session: &AgentSession, run_id: &str) -> Result<RunSnapshot, LlmError> {
        self.get_run_calls.fetch_add(1, Ordering::SeqCst);
        self.with_thread(session, |t| {
            let (id, run) = match t.run.as_mut() {
                Some((id, run)) if id.as_str() == run_id => (id.clone(), run),
                _ => return Err(LlmError::Decode(format!("unknown run {run_id}"))),
            };
            match run.polls.pop_front() {
                Some(MockPoll::Status(s)) => Ok(snapshot(&id, s)),
                Some(MockPoll::RequiresAction(calls)) => Ok(RunSnapshot {
                    tool_calls: calls,
                    ..snapshot(&id, RunStatus::RequiresAction)
                }),
                Some(MockPoll::Failed(msg)) => Ok(RunSnapshot {
                    last_error: Some(msg),
                    ..snapshot(&id, RunStatus::Failed)
                }),
                Some(MockPoll::TransportError(msg)) => Err(LlmError::Transport(msg)),
                None => match run.stuck_in {
                    Some(s) => Ok(snapshot(&id, s)),
                    None => {
                        if let Some(reply) = run.reply.take() {
                            t.last_reply = Some(reply);
                        }
                        Ok(snapshot(&id, RunStatus::Completed))
                    }
                },
            }
        })
    }

    async fn submit_tool_outputs(
        &self,
        session: &AgentSession,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunSnapshot, LlmError> {
        self.submitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((run_id.to_string(), outputs.to_vec()));
        self.with_thread(session, |_| Ok(snapshot(run_id, RunStatus::Queued)))
    }

    async fn last_assistant_message(&self, session: &AgentSession) -> Result<Option<String>, LlmError> {
        self.with_thread(session, |t| Ok(t.last_reply.clone()))
    }
}
