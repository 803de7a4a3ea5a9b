//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ACCESSGUARD__*` 覆盖（双下划线表示嵌套，如 `ACCESSGUARD__RUNS__MAX_ITERATIONS=30`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub runs: RunsSection,
    pub tools: ToolsSection,
    pub audit: AuditSection,
    pub pipeline: PipelineSection,
    pub pending: PendingSection,
    pub logging: LoggingSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 业务数据表（users.csv、hr_mutations.csv …）所在目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// [llm] 段：推理后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：assistants / mock；assistants 缺少 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// 鉴权头：bearer（Authorization: Bearer）或 api-key（Azure 风格）
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Azure 风格端点需要的 api-version 查询参数
    pub api_version: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            auth_header: default_auth_header(),
            api_version: None,
            temperature: default_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "assistants".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_auth_header() -> String {
    "bearer".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [runs] 段：Run 轮询间隔与轮询上限
#[derive(Debug, Clone, Deserialize)]
pub struct RunsSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for RunsSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl RunsSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_iterations() -> u32 {
    60
}

/// [tools] 段：工具重试次数与单次调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [audit] 段：审计账本路径与轮转阈值
#[derive(Debug, Clone, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    /// 超过该字节数时在下一次追加前轮转
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            ledger_file: default_ledger_file(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from("data/audit_trail.csv")
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

/// [pipeline] 段：每个阶段的最大尝试次数
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// [pending] 段：待人工处理动作队列
#[derive(Debug, Clone, Deserialize)]
pub struct PendingSection {
    #[serde(default = "default_pending_file")]
    pub file: PathBuf,
    /// 超过该秒数仍未响应即视为逾期
    #[serde(default = "default_overdue_secs")]
    pub overdue_secs: u64,
}

impl Default for PendingSection {
    fn default() -> Self {
        Self {
            file: default_pending_file(),
            overdue_secs: default_overdue_secs(),
        }
    }
}

fn default_pending_file() -> PathBuf {
    PathBuf::from("data/pending_actions.csv")
}

fn default_overdue_secs() -> u64 {
    600
}

/// [logging] 段：pretty（默认）或 json
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// 从 config 目录加载配置，环境变量 ACCESSGUARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ACCESSGUARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ACCESSGUARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.runs.max_iterations, 60);
        assert_eq!(cfg.runs.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.tools.max_attempts, 3);
        assert_eq!(cfg.pipeline.max_retries, 3);
        assert_eq!(cfg.audit.max_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.pending.overdue_secs, 600);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[runs]\nmax_iterations = 5\n\n[audit]\nledger_file = \"/tmp/x.csv\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.runs.max_iterations, 5);
        assert_eq!(cfg.runs.poll_interval_ms, 2000);
        assert_eq!(cfg.audit.ledger_file, PathBuf::from("/tmp/x.csv"));
    }
}
