//! Long-running tool server: owns the `Store`, serves `Orchestrator::dispatch`
//! over a newline-delimited JSON protocol on stdio, and periodically prunes
//! expired sessions and tool-call dedup records.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use agent_mesh::config::load_config;
use agent_mesh::orchestrator::Orchestrator;
use agent_mesh::store::Store;
use agent_mesh::util::agent_mesh_home;

#[derive(Parser)]
#[command(name = "agent-mesh-server")]
#[command(about = "Tool server for the agent mesh coordination substrate")]
struct Args {
    /// Path to config.toml. Defaults to $AGENT_MESH_HOME/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the SQLite store. Defaults to $AGENT_MESH_HOME/store.sqlite3.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run an in-memory store instead of a file-backed one, for smoke tests.
    #[arg(long)]
    in_memory: bool,
}

#[derive(Debug, Deserialize)]
struct ToolRequest {
    tool: String,
    agent_id: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolResponse {
    #[serde(flatten)]
    outcome: agent_mesh::orchestrator::ToolOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().expect("valid filter"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("loading configuration")?;

    // Keep the lock file handle alive for the process lifetime: dropping it
    // releases the flock. A second server pointed at the same store fails
    // fast here instead of racing the first for the SQLite writer lock.
    let _lock_guard;
    let store = if args.in_memory {
        _lock_guard = None;
        Store::open_in_memory().context("opening in-memory store")?
    } else {
        let db_path = match args.db {
            Some(path) => path,
            None => agent_mesh_home()?.join("store.sqlite3"),
        };
        _lock_guard = Some(acquire_store_lock(&db_path)?);
        Store::open(&db_path).with_context(|| format!("opening store at {}", db_path.display()))?
    };

    let orchestrator = Arc::new(Orchestrator::new(store, config.clone()));
    spawn_retention_task(orchestrator.clone(), &config);

    tracing::info!("agent-mesh-server ready, reading requests from stdin");
    serve_stdio(orchestrator).await
}

fn acquire_store_lock(db_path: &std::path::Path) -> Result<File> {
    let lock_path = db_path.with_extension("sqlite3.lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("opening lock file at {}", lock_path.display()))?;
    lock_file
        .try_lock_exclusive()
        .with_context(|| format!("another agent-mesh-server already holds {}", lock_path.display()))?;
    Ok(lock_file)
}

fn spawn_retention_task(orchestrator: Arc<Orchestrator>, config: &agent_mesh::config::Config) {
    let session_retention_hours = config.session_retention_hours;
    let dedup_window_minutes = config.dedup_window_minutes;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match orchestrator.sessions().prune(session_retention_hours, dedup_window_minutes) {
                Ok((sessions, tool_calls)) => {
                    if sessions > 0 || tool_calls > 0 {
                        tracing::info!(sessions, tool_calls, "pruned expired records");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }
    });
}

async fn serve_stdio(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => orchestrator.dispatch(
                &request.tool,
                request.agent_id.as_deref(),
                request.session_id.as_deref(),
                request.args,
            ),
            Err(e) => agent_mesh::orchestrator::ToolOutcome {
                ok: false,
                content: None,
                error: Some(format!("malformed request: {e}")),
                dedup: None,
            },
        };
        let serialized = serde_json::to_string(&ToolResponse { outcome: response })
            .unwrap_or_else(|_| r#"{"ok":false,"error":"failed to serialize response"}"#.to_string());
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
