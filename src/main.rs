//! AccessGuard 命令行入口
//!
//! 用法：
//!   accessguard [--config <file>] run <context.json>...
//!   accessguard [--config <file>] pending [--recipient <id>] [--overdue]
//!   accessguard [--config <file>] respond <action_id> <responder> <response>
//!   accessguard [--config <file>] audit <mutation_id> [--archives]
//!   accessguard [--config <file>] migrate

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use serde_json::Value;

use accessguard::audit::{AuditLedger, PendingStore};
use accessguard::config::{load_config, AppConfig};
use accessguard::observability;
use accessguard::protocol::Context;
use accessguard::workflow::{HumanResponseHandler, PipelineBuilder};

/// HR 变更调查流水线与审计账本
#[derive(Parser, Debug)]
#[command(name = "accessguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件（叠加在 config/default.toml 之上）
    #[arg(short, long, global = true, env = "ACCESSGUARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 对每个上下文 JSON 文件并发跑一条流水线
    Run {
        #[arg(required = true, value_name = "CONTEXT_JSON")]
        files: Vec<PathBuf>,
    },
    /// 列出待人工处理的动作
    Pending {
        #[arg(long)]
        recipient: Option<String>,
        /// 只列出逾期未响应的动作
        #[arg(long)]
        overdue: bool,
    },
    /// 记录人工答复
    Respond {
        action_id: String,
        responder: String,
        response: String,
    },
    /// 按 MutationID 查询审计记录
    Audit {
        mutation_id: String,
        /// 同时查询归档文件
        #[arg(long)]
        archives: bool,
    },
    /// 把旧版账本迁移到当前表头
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = load_config(cli.config).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });
    observability::init(&cfg.logging.format);

    match cli.command {
        Command::Run { files } => run(cfg, files).await,
        Command::Pending { recipient, overdue } => pending(&cfg, recipient, overdue).await,
        Command::Respond {
            action_id,
            responder,
            response,
        } => respond(&cfg, &action_id, &responder, &response).await,
        Command::Audit {
            mutation_id,
            archives,
        } => audit(&cfg, mutation_id, archives).await,
        Command::Migrate => migrate(&cfg).await,
    }
}

/// 每个上下文文件一条流水线，并发执行
async fn run(cfg: AppConfig, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let mut contexts = Vec::with_capacity(files.len());
    for file in &files {
        contexts.push(read_context(file)?);
    }

    let runtime = PipelineBuilder::new(cfg)
        .build()
        .await
        .context("Failed to build pipeline")?;

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            let pipeline = runtime.pipeline.clone();
            tokio::spawn(async move { pipeline.run(ctx).await })
        })
        .collect();

    let mut failed = false;
    for (file, handle) in files.iter().zip(handles) {
        match handle.await.context("Pipeline task panicked")? {
            Ok(outcome) => {
                if !outcome.is_completed() {
                    failed = true;
                }
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            Err(e) => {
                failed = true;
                tracing::error!(file = %file.display(), error = %e, "pipeline failed");
            }
        }
    }
    if failed {
        bail!("one or more pipelines did not complete");
    }
    Ok(())
}

async fn pending(cfg: &AppConfig, recipient: Option<String>, overdue: bool) -> anyhow::Result<()> {
    let human = human_handler(cfg);
    let actions = if overdue {
        human.overdue(chrono::Utc::now()).await?
    } else {
        human.pending_for(recipient.as_deref()).await?
    };
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

async fn respond(cfg: &AppConfig, action_id: &str, responder: &str, response: &str) -> anyhow::Result<()> {
    let action = human_handler(cfg).respond(action_id, responder, response).await?;
    println!("{}", serde_json::to_string_pretty(&action)?);
    Ok(())
}

async fn audit(cfg: &AppConfig, mutation_id: String, with_archives: bool) -> anyhow::Result<()> {
    let ledger = AuditLedger::from_config(&cfg.audit);
    let records = tokio::task::spawn_blocking(move || {
        if with_archives {
            ledger.query_with_archives(&mutation_id)
        } else {
            ledger.query(&mutation_id)
        }
    })
    .await??;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn migrate(cfg: &AppConfig) -> anyhow::Result<()> {
    let ledger = AuditLedger::from_config(&cfg.audit);
    let path = ledger.path().display().to_string();
    let changed = tokio::task::spawn_blocking(move || ledger.migrate_schema()).await??;
    if changed {
        println!("migrated {path} to the current schema");
    } else {
        println!("{path} already uses the current schema");
    }
    Ok(())
}

fn human_handler(cfg: &AppConfig) -> HumanResponseHandler {
    HumanResponseHandler::new(
        PendingStore::new(&cfg.pending.file),
        AuditLedger::from_config(&cfg.audit),
        chrono::Duration::seconds(i64::try_from(cfg.pending.overdue_secs).unwrap_or(i64::MAX)),
    )
}

fn read_context(file: &Path) -> anyhow::Result<Context> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    match serde_json::from_str::<Value>(&raw).with_context(|| format!("Invalid JSON in {}", file.display()))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{}: context must be a JSON object", file.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["accessguard", "--config", "x.toml", "pending", "--recipient", "u-17"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Command::Pending { recipient: Some(ref r), overdue: false } if r == "u-17"
        ));

        let cli = Cli::try_parse_from(["accessguard", "audit", "1001", "--archives"]).unwrap();
        assert!(matches!(cli.command, Command::Audit { ref mutation_id, archives: true } if mutation_id == "1001"));

        let cli = Cli::try_parse_from(["accessguard", "respond", "a1", "u-17", "approved"]).unwrap();
        assert!(matches!(cli.command, Command::Respond { .. }));
    }

    #[test]
    fn test_run_requires_files() {
        assert!(Cli::try_parse_from(["accessguard", "run"]).is_err());
        let cli = Cli::try_parse_from(["accessguard", "run", "a.json", "b.json"]).unwrap();
        assert!(matches!(cli.command, Command::Run { ref files } if files.len() == 2));
    }
}
