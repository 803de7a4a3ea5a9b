//! 待人工处理动作队列（CSV）
//!
//! notify_send 工具创建 pending 行；人工响应把它翻转为 responded，且只能翻转一次。行从不删除。

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audit::ledger::write_atomically;
use crate::audit::lock::with_file_lock;

pub const PENDING_HEADER: &str = "action_id,type,recipient_id,context,status,created_at,response";

#[derive(Error, Debug)]
pub enum PendingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Pending action not found: {0}")]
    NotFound(String),

    #[error("Pending action already responded: {0}")]
    AlreadyResponded(String),

    #[error("Background task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Responded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub recipient_id: String,
    /// JSON 编码的 context
    pub context: String,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub response: String,
}

impl PendingAction {
    pub fn context_json(&self) -> Value {
        serde_json::from_str(&self.context).unwrap_or(Value::Null)
    }

    /// 仍为 pending 且创建时间早于 now - threshold
    pub fn is_overdue(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == PendingStatus::Pending && now - self.created_at > threshold
    }
}

#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 新建一条 pending 动作并追加到队列文件
    pub fn create(
        &self,
        action_type: &str,
        recipient_id: &str,
        context: &Value,
    ) -> Result<PendingAction, PendingError> {
        let action = PendingAction {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.to_string(),
            recipient_id: recipient_id.to_string(),
            context: context.to_string(),
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            response: String::new(),
        };
        let row = encode(&[action.clone()], false)?;

        with_file_lock(&self.path, || -> Result<(), PendingError> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let fresh = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
            let mut buf = Vec::new();
            if fresh {
                buf.extend_from_slice(PENDING_HEADER.as_bytes());
                buf.push(b'\n');
            }
            buf.extend(row);
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(&buf)?;
            Ok(())
        })?;

        tracing::info!(
            action_id = %action.action_id,
            recipient = %action.recipient_id,
            action_type = %action.action_type,
            "pending action created"
        );
        Ok(action)
    }

    pub fn list_all(&self) -> Result<Vec<PendingAction>, PendingError> {
        read_actions(&self.path)
    }

    /// 某个接收人仍在等待的动作；recipient 为 None 时返回全部 pending
    pub fn list_pending(&self, recipient: Option<&str>) -> Result<Vec<PendingAction>, PendingError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|a| a.status == PendingStatus::Pending)
            .filter(|a| recipient.map_or(true, |r| a.recipient_id == r))
            .collect())
    }

    pub fn overdue(&self, now: DateTime<Utc>, threshold: Duration) -> Result<Vec<PendingAction>, PendingError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|a| a.is_overdue(now, threshold))
            .collect())
    }

    /// pending → responded，整个文件经临时文件 + rename 改写
    pub fn respond(&self, action_id: &str, response: &str) -> Result<PendingAction, PendingError> {
        self.respond_with(action_id, response, |_| Ok::<(), PendingError>(()))
    }

    /// 同 respond，但在持锁状态下先执行 commit，commit 成功后才落盘；
    /// commit 失败时文件保持不变，动作仍为 pending
    pub fn respond_with<E>(
        &self,
        action_id: &str,
        response: &str,
        commit: impl FnOnce(&PendingAction) -> Result<(), E>,
    ) -> Result<PendingAction, E>
    where
        E: From<PendingError>,
    {
        let outcome = with_file_lock(&self.path, || -> Result<Result<PendingAction, E>, PendingError> {
            let mut actions = read_actions(&self.path)?;
            let action = actions
                .iter_mut()
                .find(|a| a.action_id == action_id)
                .ok_or_else(|| PendingError::NotFound(action_id.to_string()))?;
            if action.status == PendingStatus::Responded {
                return Err(PendingError::AlreadyResponded(action_id.to_string()));
            }
            action.status = PendingStatus::Responded;
            action.response = response.to_string();
            let updated = action.clone();

            if let Err(e) = commit(&updated) {
                return Ok(Err(e));
            }
            write_atomically(&self.path, &encode(&actions, true)?)?;
            Ok(Ok(updated))
        });
        outcome?
    }
}

fn encode(actions: &[PendingAction], with_header: bool) -> Result<Vec<u8>, PendingError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for a in actions {
        writer.serialize(a)?;
    }
    writer
        .into_inner()
        .map_err(|e| PendingError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

fn read_actions(path: &Path) -> Result<Vec<PendingAction>, PendingError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut out = Vec::new();
    for row in reader.deserialize() {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_list() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("pending.csv"));
        let a = store.create("rfi", "u001", &json!({"mutation_id": "M1"})).unwrap();
        store.create("rfi", "m001", &json!({"mutation_id": "M1"})).unwrap();

        assert_eq!(store.list_all().unwrap().len(), 2);
        let mine = store.list_pending(Some("u001")).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].action_id, a.action_id);
        assert_eq!(mine[0].context_json()["mutation_id"], "M1");
    }

    #[test]
    fn test_respond_once() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("pending.csv"));
        let a = store.create("rfi", "u001", &json!({})).unwrap();

        let done = store.respond(&a.action_id, "I needed it, for the audit").unwrap();
        assert_eq!(done.status, PendingStatus::Responded);
        assert!(store.list_pending(None).unwrap().is_empty());
        assert_eq!(store.list_all().unwrap()[0].response, "I needed it, for the audit");

        assert!(matches!(
            store.respond(&a.action_id, "again"),
            Err(PendingError::AlreadyResponded(_))
        ));
        assert!(matches!(store.respond("missing", "x"), Err(PendingError::NotFound(_))));
    }

    #[test]
    fn test_failed_commit_leaves_action_pending() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("pending.csv"));
        let a = store.create("rfi", "u001", &json!({})).unwrap();

        let err = store
            .respond_with(&a.action_id, "too early", |seen| {
                assert_eq!(seen.status, PendingStatus::Responded);
                Err(PendingError::Io(io::Error::new(io::ErrorKind::Other, "sink down")))
            })
            .unwrap_err();
        assert!(matches!(err, PendingError::Io(_)));

        let all = store.list_all().unwrap();
        assert_eq!(all[0].status, PendingStatus::Pending);
        assert!(all[0].response.is_empty());
        assert!(store.respond(&a.action_id, "now").is_ok());
    }

    #[test]
    fn test_overdue() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("pending.csv"));
        store.create("rfi", "u001", &json!({})).unwrap();

        let threshold = Duration::seconds(600);
        assert!(store.overdue(Utc::now(), threshold).unwrap().is_empty());
        let later = Utc::now() + Duration::seconds(601);
        assert_eq!(store.overdue(later, threshold).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = PendingStore::new(dir.path().join("none.csv"));
        assert!(store.list_all().unwrap().is_empty());
    }
}
