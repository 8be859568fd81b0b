//! Configuration: default channels/subscriptions, project links, dedup and
//! retention windows, semantic search settings (spec §6).
//!
//! TOML at `$AGENT_MESH_HOME/config.toml`, following this codebase's
//! `config::loader` load/validate split (minus the JSON-specific credential
//! plumbing, which has no analogue here).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::{agent_mesh_home, atomic_write, ensure_dir};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedChannel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultChannels {
    #[serde(default)]
    pub global: Vec<NamedChannel>,
    #[serde(default)]
    pub project: Vec<NamedChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultSubscriptions {
    #[serde(default)]
    pub global: Vec<String>,
    #[serde(default)]
    pub project: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Bidirectional,
    AToB,
    BToA,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectLinkConfig {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_profile")]
    pub default_profile: String,
    pub half_life_hours_override: Option<f64>,
    /// `fastembed` model identifier. Only consulted when `enabled` and the
    /// crate was built with the `semantic` feature; ignored otherwise.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_profile() -> String {
    "balanced".to_string()
}

fn default_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_profile: default_profile(),
            half_life_hours_override: None,
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_channels: DefaultChannels,
    #[serde(default)]
    pub default_agent_subscriptions: DefaultSubscriptions,
    #[serde(default)]
    pub project_links: Vec<ProjectLinkConfig>,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_minutes: i64,
    #[serde(default = "default_retention")]
    pub session_retention_hours: i64,
    #[serde(default)]
    pub semantic: SemanticConfig,
}

fn default_dedup_window() -> i64 {
    10
}

fn default_retention() -> i64 {
    24
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_channels: DefaultChannels::default(),
            default_agent_subscriptions: DefaultSubscriptions::default(),
            project_links: Vec::new(),
            dedup_window_minutes: default_dedup_window(),
            session_retention_hours: default_retention(),
            semantic: SemanticConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for group in [&self.default_channels.global, &self.default_channels.project] {
            for ch in group {
                if !crate::ids::is_valid_channel_name(&ch.name) {
                    anyhow::bail!("invalid default channel name: {}", ch.name);
                }
            }
        }
        if self.dedup_window_minutes < 0 {
            anyhow::bail!("dedup_window_minutes must be >= 0");
        }
        if self.session_retention_hours < 0 {
            anyhow::bail!("session_retention_hours must be >= 0");
        }
        for link in &self.project_links {
            if link.source == link.target {
                anyhow::bail!("project link source and target must differ: {}", link.source);
            }
        }
        if crate::search::RankingProfile::named(&self.semantic.default_profile).is_none() {
            anyhow::bail!("unknown semantic.default_profile: {}", self.semantic.default_profile);
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(agent_mesh_home()?.join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let default_path = config_path().unwrap_or_else(|_| PathBuf::from("config.toml"));
    let path = path.unwrap_or(default_path.as_path());

    if !path.exists() {
        let config = Config::default();
        config.validate().context("default configuration failed validation")?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "failed to parse config TOML")?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

pub fn save_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let default_path = config_path().unwrap_or_else(|_| PathBuf::from("config.toml"));
    let path = path.unwrap_or(default_path.as_path());
    ensure_dir(path.parent().context("config path has no parent")?)?;
    let content = toml::to_string_pretty(config)?;
    atomic_write(path, &content)
}

#[cfg(test)]
mod tests;
