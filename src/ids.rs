//! Identifier derivation and the channel handle grammar (spec §3, §6).

use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// `global` sentinel project scope.
pub const GLOBAL_SCOPE: &str = "global";

/// Derive a project id from its absolute path: sha256 hex, truncated to 32
/// chars. Two equal paths always yield the same id; different paths with the
/// same basename yield different ids because the whole path is hashed.
pub fn project_id(absolute_path: &str) -> String {
    let digest = Sha256::digest(absolute_path.as_bytes());
    let hex = hex::encode(digest);
    hex[..32].to_string()
}

static NAME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9-]+$").expect("valid regex"));

/// Non-DM channel names must match `^[a-z0-9-]+$`.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty() && NAME_RE.is_match(name)
}

/// A scope is either the global sentinel or a project id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Project(String),
}

impl Scope {
    pub fn as_handle_segment(&self) -> &str {
        match self {
            Scope::Global => GLOBAL_SCOPE,
            Scope::Project(id) => id,
        }
    }

    pub fn from_segment(segment: &str) -> Self {
        if segment == GLOBAL_SCOPE {
            Scope::Global
        } else {
            Scope::Project(segment.to_string())
        }
    }

    /// Empty-string form used inside a DM `part`: global agents carry an
    /// empty project segment there instead of the literal word `global`.
    pub fn as_dm_part(&self) -> &str {
        match self {
            Scope::Global => "",
            Scope::Project(id) => id,
        }
    }

    pub fn from_dm_part(part: &str) -> Self {
        if part.is_empty() {
            Scope::Global
        } else {
            Scope::Project(part.to_string())
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_handle_segment())
    }
}

/// Parsed, canonical channel handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelHandle {
    Global { name: String },
    Project { project: String, name: String },
    Direct { a: (String, Scope), b: (String, Scope) },
    Notes { agent: String, scope: Scope },
}

impl ChannelHandle {
    pub fn global(name: impl Into<String>) -> Self {
        ChannelHandle::Global { name: name.into() }
    }

    pub fn project(project: impl Into<String>, name: impl Into<String>) -> Self {
        ChannelHandle::Project {
            project: project.into(),
            name: name.into(),
        }
    }

    pub fn notes(agent: impl Into<String>, scope: Scope) -> Self {
        ChannelHandle::Notes {
            agent: agent.into(),
            scope,
        }
    }

    /// Build the canonical DM handle: the two `(name, scope)` parts are
    /// sorted lexicographically on `"name:project_or_empty"` so the same
    /// pair always maps to the same handle regardless of argument order.
    pub fn direct(a_name: impl Into<String>, a_scope: Scope, b_name: impl Into<String>, b_scope: Scope) -> Self {
        let a_name = a_name.into();
        let b_name = b_name.into();
        let a_key = format!("{}:{}", a_name, a_scope.as_dm_part());
        let b_key = format!("{}:{}", b_name, b_scope.as_dm_part());
        if a_key <= b_key {
            ChannelHandle::Direct {
                a: (a_name, a_scope),
                b: (b_name, b_scope),
            }
        } else {
            ChannelHandle::Direct {
                a: (b_name, b_scope),
                b: (a_name, a_scope),
            }
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ChannelHandle::Direct { .. })
    }

    pub fn is_notes(&self) -> bool {
        matches!(self, ChannelHandle::Notes { .. })
    }

    /// The owning project scope, if this handle is project-scoped.
    pub fn project_scope(&self) -> Option<&str> {
        match self {
            ChannelHandle::Project { project, .. } => Some(project),
            _ => None,
        }
    }

    pub fn parse(handle: &str) -> Option<Self> {
        if let Some(rest) = handle.strip_prefix("global:") {
            if rest.is_empty() {
                return None;
            }
            return Some(ChannelHandle::Global {
                name: rest.to_string(),
            });
        }
        if let Some(rest) = handle.strip_prefix("dm:") {
            let parts: Vec<&str> = rest.splitn(4, ':').collect();
            if parts.len() != 4 {
                return None;
            }
            let a = (parts[0].to_string(), Scope::from_dm_part(parts[1]));
            let b = (parts[2].to_string(), Scope::from_dm_part(parts[3]));
            return Some(ChannelHandle::Direct { a, b });
        }
        if let Some(rest) = handle.strip_prefix("notes:") {
            let mut parts = rest.splitn(2, ':');
            let agent = parts.next()?.to_string();
            let scope_seg = parts.next()?;
            if agent.is_empty() || scope_seg.is_empty() {
                return None;
            }
            return Some(ChannelHandle::Notes {
                agent,
                scope: Scope::from_segment(scope_seg),
            });
        }
        // project_id ":" name — project id has no further colons before name.
        let mut parts = handle.splitn(2, ':');
        let project = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        if project.is_empty() || name.is_empty() {
            return None;
        }
        Some(ChannelHandle::Project { project, name })
    }
}

impl std::fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelHandle::Global { name } => write!(f, "global:{name}"),
            ChannelHandle::Project { project, name } => write!(f, "{project}:{name}"),
            ChannelHandle::Direct { a, b } => write!(
                f,
                "dm:{}:{}:{}:{}",
                a.0,
                a.1.as_dm_part(),
                b.0,
                b.1.as_dm_part()
            ),
            ChannelHandle::Notes { agent, scope } => write!(f, "notes:{agent}:{scope}"),
        }
    }
}

static MENTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"@([A-Za-z0-9_-]+(?::[A-Za-z0-9_-]+)?)").expect("valid regex")
});

/// Extract raw `@name` / `@name:project` tokens from message content.
/// Does not validate membership — that's the Message Engine's job.
pub fn extract_mention_tokens(content: &str) -> Vec<(String, Option<String>)> {
    MENTION_RE
        .captures_iter(content)
        .map(|cap| {
            let token = cap.get(1).expect("group 1 always present").as_str();
            match token.split_once(':') {
                Some((name, project)) => (name.to_string(), Some(project.to_string())),
                None => (token.to_string(), None),
            }
        })
        .collect()
}
