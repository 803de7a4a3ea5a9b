//! 业务数据表访问
//!
//! data_dir 下的 CSV 表（users、hr_mutations、authorisations …）按逻辑名读取，`#` 开头的注释行跳过，
//! 每行转成 `{列名: 字符串}` 的 JSON 对象。只读，不做 schema 校验。

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// 允许查询的逻辑表名
pub const TABLES: [&str; 7] = [
    "users",
    "hr_mutations",
    "authorisations",
    "role_authorisations",
    "roles",
    "sickLeave",
    "vacation",
];

pub type Row = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct DataTables {
    dir: PathBuf,
}

impl DataTables {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 逻辑名（允许带 .csv 后缀）→ 文件路径；未知表名返回错误
    pub fn path_of(&self, name: &str) -> Result<PathBuf, String> {
        let logical = name.strip_suffix(".csv").unwrap_or(name);
        if !TABLES.contains(&logical) {
            return Err(format!("Unknown CSV file: {name}"));
        }
        Ok(self.dir.join(format!("{logical}.csv")))
    }

    pub async fn read(&self, name: &str) -> Result<Vec<Row>, String> {
        let path = self.path_of(name)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;
        parse_table(&content)
    }

    /// 所有 query 键值都相等的行；查询值为非字符串时按其 JSON 文本比较
    pub async fn lookup(&self, name: &str, query: &Map<String, Value>) -> Result<Vec<Row>, String> {
        let rows = self.read(name).await?;
        Ok(rows.into_iter().filter(|row| row_matches(row, query)).collect())
    }
}

pub fn parse_table(content: &str) -> Result<Vec<Row>, String> {
    let body: String = content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .map(|l| format!("{l}\n"))
        .collect();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                (
                    h.to_string(),
                    Value::String(record.get(i).unwrap_or_default().to_string()),
                )
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

pub fn row_matches(row: &Row, query: &Map<String, Value>) -> bool {
    query.iter().all(|(k, want)| {
        let want = match want {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        row.get(k).and_then(Value::as_str) == Some(want.as_str())
    })
}

/// 列名宽松匹配：忽略大小写与下划线（UserID / user_id）
pub fn column<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    let norm = |s: &str| s.replace('_', "").to_ascii_lowercase();
    let want = norm(name);
    row.iter()
        .find(|(k, _)| norm(k) == want)
        .and_then(|(_, v)| v.as_str())
}
