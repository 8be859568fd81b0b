//! Small filesystem helpers shared by config loading and the store.
//!
//! Grounded on this codebase's `utils::ensure_dir` / `atomic_write` /
//! `get_*_home` pattern.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Base directory for the store, config, and logs. `AGENT_MESH_HOME`
/// overrides; `CLAUDE_CONFIG_DIR` is the next fallback (the host process's
/// own base directory, reused here rather than requiring a second
/// variable); otherwise `~/.agent-mesh`.
pub fn agent_mesh_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("AGENT_MESH_HOME") {
        return Ok(PathBuf::from(home));
    }
    if let Some(dir) = std::env::var_os("CLAUDE_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    Ok(dirs::home_dir()
        .context("could not determine home directory")?
        .join(".agent-mesh"))
}

/// Resolve the project directory a session should be scoped to. `explicit`
/// (the hook event's own `cwd` field) wins when present; otherwise
/// `CLAUDE_PROJECT_DIR`, then `CLAUDE_WORKING_DIR` — the two environment
/// variables the host process sets for, respectively, a single resolved
/// project root and a multi-project workspace root. `None` means global
/// scope.
pub fn resolved_project_dir(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }
    for var in ["CLAUDE_PROJECT_DIR", "CLAUDE_WORKING_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            if !dir.is_empty() {
                return Some(dir);
            }
        }
    }
    None
}

/// Write content atomically via tempfile + rename: either fully written or
/// the original file remains untouched.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().context("path has no parent directory")?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tmp
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600));
    }
    tmp.write_all(content.as_bytes())
        .with_context(|| "failed to write to temp file")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to atomically rename to {}", path.display()))?;
    Ok(())
}
