//! 只追加审计账本（CSV）
//!
//! - 追加：每行一次 write_all，文件以 O_APPEND 打开；文件不存在时连同表头一起创建
//! - 轮转：超过 max_bytes 时把活动账本 rename 成 `<stem>_archive_<YYYYmmddHHMMSS>.csv`，
//!   新账本写入原说明文字 + 表头
//! - 迁移：缺 Reasoning 列的旧账本经临时文件 + rename 改写为 8 列
//!
//! 核心是同步实现，全部在 with_file_lock 内执行；异步调用方通过 record_async / append_async
//! 进入 spawn_blocking。

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::audit::lock::with_file_lock;
use crate::audit::record::{AuditRecord, HEADER, HEADER_PREFIX};
use crate::protocol::Envelope;

const APPEND_ATTEMPTS: u32 = 3;
const APPEND_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

/// 审计账本句柄：只含路径与阈值，可随意 clone；互斥由 with_file_lock 按路径保证
#[derive(Debug, Clone)]
pub struct AuditLedger {
    path: PathBuf,
    max_bytes: u64,
}

impl AuditLedger {
    pub fn new(path: impl AsRef<Path>, max_bytes: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_bytes,
        }
    }

    pub fn from_config(cfg: &crate::config::AuditSection) -> Self {
        Self::new(&cfg.ledger_file, cfg.max_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录；I/O 失败时短暂退避后重试，全部失败才返回错误
    pub fn append(&self, record: &AuditRecord) -> Result<(), LedgerError> {
        let row = encode_row(record)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match with_file_lock(&self.path, || self.append_locked(&row)) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < APPEND_ATTEMPTS => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "audit append failed, retrying"
                    );
                    std::thread::sleep(APPEND_BACKOFF * attempt);
                }
                Err(e) => {
                    tracing::error!(path = %self.path.display(), error = %e, "audit append failed");
                    return Err(e);
                }
            }
        }
    }

    /// 由信封生成记录并追加，返回写入的记录
    pub fn record(&self, envelope: &Envelope) -> Result<AuditRecord, LedgerError> {
        let record = AuditRecord::from_envelope(envelope);
        self.append(&record)?;
        Ok(record)
    }

    pub async fn append_async(&self, record: AuditRecord) -> Result<AuditRecord, LedgerError> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.append(&record).map(|_| record))
            .await
            .map_err(|e| LedgerError::Join(e.to_string()))?
    }

    pub async fn record_async(&self, envelope: &Envelope) -> Result<AuditRecord, LedgerError> {
        self.append_async(AuditRecord::from_envelope(envelope)).await
    }

    fn append_locked(&self, row: &[u8]) -> Result<(), LedgerError> {
        let len = match fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if len > self.max_bytes {
            match self.rotate_locked() {
                Ok(archive) => {
                    tracing::info!(
                        ledger = %self.path.display(),
                        archive = %archive.display(),
                        "audit ledger rotated"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        ledger = %self.path.display(),
                        error = %e,
                        "audit rotation failed, appending to current ledger"
                    );
                }
            }
        }

        // 文件缺失、为空或只有说明文字时都要先补表头
        let fresh = !has_header(&self.path)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut buf = Vec::with_capacity(row.len() + 96);
        if fresh {
            buf.extend_from_slice(header_line().as_bytes());
        }
        buf.extend_from_slice(row);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// 活动账本整体 rename 为归档文件，新账本只含说明文字 + 表头
    fn rotate_locked(&self) -> Result<PathBuf, LedgerError> {
        let content = fs::read_to_string(&self.path)?;
        let (prose, rest) = split_prose(&content);
        let header = rest
            .lines()
            .next()
            .map(|l| format!("{l}\n"))
            .unwrap_or_else(header_line);

        let archive = self.next_archive_path();
        fs::rename(&self.path, &archive)?;
        if let Err(e) = write_atomically(&self.path, format!("{prose}{header}").as_bytes()) {
            // 新账本建不起来就把归档挪回原位，已提交的行继续留在活动账本里
            if let Err(back) = fs::rename(&archive, &self.path) {
                tracing::error!(
                    archive = %archive.display(),
                    error = %back,
                    "failed to restore ledger after rotation error"
                );
            }
            return Err(e.into());
        }
        Ok(archive)
    }

    fn next_archive_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit_trail".to_string());
        let dir = self.dir();

        let mut candidate = dir.join(format!("{stem}_archive_{stamp}.csv"));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{stem}_archive_{stamp}_{n}.csv"));
            n += 1;
        }
        candidate
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// 归档文件列表，按文件名（即时间）升序
    pub fn archives(&self) -> Result<Vec<PathBuf>, LedgerError> {
        let stem = match self.path.file_stem() {
            Some(s) => s.to_string_lossy().into_owned(),
            None => return Ok(Vec::new()),
        };
        let prefix = format!("{stem}_archive_");
        let dir = self.dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
                    .unwrap_or(false)
            })
            .collect();
        out.sort();
        Ok(out)
    }

    /// 活动账本的全部记录（文件顺序）
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, LedgerError> {
        read_records(&self.path)
    }

    /// 活动账本中 MutationID 等于 mutation_id 的记录（文件顺序）
    pub fn query(&self, mutation_id: &str) -> Result<Vec<AuditRecord>, LedgerError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.mutation_id == mutation_id)
            .collect())
    }

    /// 先查归档（最旧的在前），再查活动账本
    pub fn query_with_archives(&self, mutation_id: &str) -> Result<Vec<AuditRecord>, LedgerError> {
        let mut out = Vec::new();
        for archive in self.archives()? {
            out.extend(
                read_records(&archive)?
                    .into_iter()
                    .filter(|r| r.mutation_id == mutation_id),
            );
        }
        out.extend(self.query(mutation_id)?);
        Ok(out)
    }

    /// 给旧版账本补上 Reasoning 列；已是新版或文件不存在时返回 Ok(false)
    pub fn migrate_schema(&self) -> Result<bool, LedgerError> {
        with_file_lock(&self.path, || {
            if !self.path.exists() {
                return Ok(false);
            }
            let content = fs::read_to_string(&self.path)?;
            let (prose, rest) = split_prose(&content);
            let has_reasoning = rest
                .lines()
                .next()
                .map(|h| h.split(',').any(|c| c.trim() == "Reasoning"))
                .unwrap_or(false);
            if has_reasoning {
                return Ok(false);
            }

            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .from_reader(rest.as_bytes());
            let mut body = Vec::new();
            for row in reader.records() {
                body.extend(encode_row(&AuditRecord::from_row(&row?))?);
            }

            let mut out = Vec::with_capacity(content.len() + body.len() / 8);
            out.extend_from_slice(prose.as_bytes());
            out.extend_from_slice(header_line().as_bytes());
            out.extend(body);
            write_atomically(&self.path, &out)?;
            tracing::info!(ledger = %self.path.display(), "audit ledger migrated to 8-column schema");
            Ok(true)
        })
    }
}

/// 拆出表头之前的说明文字；找不到表头时整份内容都视为说明
pub fn split_prose(content: &str) -> (&str, &str) {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.starts_with(HEADER_PREFIX) {
            return content.split_at(offset);
        }
        offset += line.len();
    }
    (content, "")
}

/// 文件中是否已有表头行；文件不存在视为没有
fn has_header(path: &Path) -> io::Result<bool> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    for line in BufReader::new(file).lines() {
        if line?.starts_with(HEADER_PREFIX) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn header_line() -> String {
    format!("{}\n", HEADER.join(","))
}

fn encode_row(record: &AuditRecord) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.serialize(record)?;
    writer
        .into_inner()
        .map_err(|e| LedgerError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, LedgerError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let (_, rest) = split_prose(&content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(rest.as_bytes());
    let mut out = Vec::new();
    for row in reader.records() {
        out.push(AuditRecord::from_row(&row?));
    }
    Ok(out)
}

/// 写临时文件后 rename 覆盖目标
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}
