//! Session-start hook: a short-lived process invoked once per session.
//! Reads a single JSON record from stdin, registers the session, and
//! ensures the configured default channels exist for its resolved scope.
//! Agent descriptor files on disk are out of scope for this crate; an
//! agent only becomes known to the store the first time it calls a tool.

use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use agent_mesh::channel::ChannelEngine;
use agent_mesh::config::load_config;
use agent_mesh::ids::Scope;
use agent_mesh::session::SessionEngine;
use agent_mesh::store::{AccessType, Store};
use agent_mesh::util::{agent_mesh_home, resolved_project_dir};

#[derive(Parser)]
#[command(name = "agent-mesh-hook")]
#[command(about = "Session-start hook for the agent mesh coordination substrate")]
struct Args {
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[arg(long)]
    db: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
struct HookEvent {
    session_id: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    hook_event_name: Option<String>,
    #[serde(default)]
    transcript_path: Option<String>,
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".parse().expect("valid filter"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("loading configuration")?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading hook event from stdin")?;
    let event: HookEvent = serde_json::from_str(&input).context("parsing hook event")?;

    let db_path = match args.db {
        Some(path) => path,
        None => agent_mesh_home()?.join("store.sqlite3"),
    };
    let store = Store::open(&db_path).with_context(|| format!("opening store at {}", db_path.display()))?;
    let sessions = SessionEngine::new(store.clone());
    let channels = ChannelEngine::new(store);

    let cwd = resolved_project_dir(event.cwd.as_deref());
    let ctx = sessions
        .register_session(&event.session_id, cwd.as_deref(), event.transcript_path.as_deref())
        .context("registering session")?;

    let mut created = 0usize;
    for default in &config.default_channels.global {
        channels
            .create_channel(&default.name, &Scope::Global, AccessType::Open, None, default.is_default, &default.description)
            .context("ensuring global default channel")?;
        created += 1;
    }
    if let Scope::Project(_) = &ctx.scope {
        for default in &config.default_channels.project {
            channels
                .create_channel(&default.name, &ctx.scope, AccessType::Open, None, default.is_default, &default.description)
                .context("ensuring project default channel")?;
            created += 1;
        }
    }

    eprintln!(
        "agent-mesh-hook: session {} ({}) scope={} event={} default_channels_ensured={}",
        event.session_id,
        cwd.as_deref().unwrap_or("-"),
        ctx.scope,
        event.hook_event_name.as_deref().unwrap_or("unknown"),
        created,
    );
    Ok(())
}
