//! Session & Project Context (spec §4.6): session registration, project
//! identity, caller resolution, and tool-call dedup.
//!
//! The LRU session-context cache mirrors this codebase's
//! `SessionManager`'s `LruCache` pattern, generalized to hold derived scope
//! context instead of chat history.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::errors::{CoreError, CoreResult};
use crate::ids::{self, Scope};
use crate::store::{ProjectRow, SessionRow, Store};

const CACHE_CAPACITY: usize = 256;
const CACHE_SOFT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub scope: Scope,
    pub project: Option<ProjectRow>,
}

struct CachedContext {
    context: SessionContext,
    cached_at: Instant,
}

pub struct SessionEngine {
    store: Store,
    cache: Mutex<LruCache<String, CachedContext>>,
}

impl SessionEngine {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero"))),
        }
    }

    /// Register or refresh a session. `cwd` is matched against a project
    /// path when given; otherwise the session is `global`-scoped.
    pub fn register_session(&self, session_id: &str, cwd: Option<&str>, transcript_path: Option<&str>) -> CoreResult<SessionContext> {
        let (scope, project) = match cwd {
            Some(path) if !path.is_empty() => {
                let id = ids::project_id(path);
                let display_name = path
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(path)
                    .to_string();
                let row = self.store.register_project(&id, path, &display_name)?;
                (Scope::Project(id), Some(row))
            }
            _ => (Scope::Global, None),
        };

        let row = SessionRow {
            id: session_id.to_string(),
            project: project.as_ref().map(|p| p.id.clone()),
            project_path: project.as_ref().map(|p| p.path.clone()),
            project_name: project.as_ref().map(|p| p.display_name.clone()),
            transcript_path: transcript_path.map(str::to_string),
            scope: scope.as_handle_segment().to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            metadata: "{}".to_string(),
        };
        self.store.register_session(&row)?;

        let context = SessionContext {
            session_id: session_id.to_string(),
            scope,
            project,
        };
        let mut cache = self.cache.lock().expect("session cache poisoned");
        cache.put(
            session_id.to_string(),
            CachedContext {
                context: context.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(context)
    }

    pub fn get_session_context(&self, session_id: &str) -> CoreResult<Option<SessionContext>> {
        {
            let mut cache = self.cache.lock().expect("session cache poisoned");
            if let Some(cached) = cache.get(session_id) {
                if cached.cached_at.elapsed() < CACHE_SOFT_TTL {
                    return Ok(Some(cached.context.clone()));
                }
            }
        }
        let Some(row) = self.store.get_session(session_id)? else {
            return Ok(None);
        };
        let project = match &row.project {
            Some(id) => self.store.get_project(id)?,
            None => None,
        };
        let context = SessionContext {
            session_id: row.id.clone(),
            scope: Scope::from_segment(&row.scope),
            project,
        };
        let mut cache = self.cache.lock().expect("session cache poisoned");
        cache.put(
            session_id.to_string(),
            CachedContext {
                context: context.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(Some(context))
    }

    /// Resolve `agent_id` (`name` or `name@project-hint`) to a concrete
    /// `(name, scope)` pair. Order: explicit scope in `agent_id` > the
    /// session's own project > global > linked-project agents, most
    /// recently linked first. An agent never seen before is registered on
    /// first resolution rather than rejected — there's no separate
    /// registration call in the external interface (spec §6), a caller
    /// becomes known the first time it's named. The `bool` reports whether
    /// this call just created the agent, so the orchestrator can apply
    /// default-channel membership exactly once.
    pub fn resolve_caller(&self, agent_id: &str, session_id: Option<&str>) -> CoreResult<(String, Scope, bool)> {
        let (name, explicit_scope) = match agent_id.split_once('@') {
            Some((name, hint)) => (name.to_string(), Some(Scope::from_segment(hint))),
            None => (agent_id.to_string(), None),
        };
        if name.is_empty() {
            return Err(CoreError::InvalidInput("agent_id must not be blank".to_string()));
        }

        if let Some(scope) = explicit_scope {
            if self.store.get_agent(&name, scope.as_handle_segment())?.is_some() {
                return Ok((name, scope, false));
            }
            self.store.upsert_agent(&name, scope.as_handle_segment(), "")?;
            return Ok((name, scope, true));
        }

        if let Some(session_id) = session_id {
            if let Some(ctx) = self.get_session_context(session_id)? {
                if self
                    .store
                    .get_agent(&name, ctx.scope.as_handle_segment())?
                    .is_some()
                {
                    return Ok((name, ctx.scope, false));
                }
                if self.store.get_agent(&name, ids::GLOBAL_SCOPE)?.is_some() {
                    return Ok((name, Scope::Global, false));
                }
                for link in self.store.list_project_links()? {
                    let other = if link.source == ctx.scope.as_handle_segment() {
                        Some(link.target.clone())
                    } else if link.target == ctx.scope.as_handle_segment() {
                        Some(link.source.clone())
                    } else {
                        None
                    };
                    if let Some(other_scope) = other {
                        if self.store.get_agent(&name, &other_scope)?.is_some() {
                            return Ok((name, Scope::Project(other_scope), false));
                        }
                    }
                }
                self.store.upsert_agent(&name, ctx.scope.as_handle_segment(), "")?;
                return Ok((name, ctx.scope, true));
            }
        }

        if self.store.get_agent(&name, ids::GLOBAL_SCOPE)?.is_some() {
            return Ok((name, Scope::Global, false));
        }
        self.store.upsert_agent(&name, ids::GLOBAL_SCOPE, "")?;
        Ok((name, Scope::Global, true))
    }

    /// Canonicalized-JSON digest of dedup inputs: serde_json's map ordering
    /// is insertion order, so round-trip through a `BTreeMap` to sort keys
    /// before hashing.
    pub fn digest_inputs(inputs: &serde_json::Value) -> String {
        let canonical = canonicalize(inputs);
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let hash = Sha256::digest(bytes);
        hex::encode(hash)
    }

    pub fn record_tool_call(&self, session_id: &str, tool: &str, inputs: &serde_json::Value, window_minutes: i64) -> CoreResult<crate::store::DedupOutcome> {
        let digest = Self::digest_inputs(inputs);
        Ok(self.store.record_tool_call(session_id, tool, &digest, window_minutes)?)
    }

    pub fn prune(&self, session_retention_hours: i64, tool_call_window_minutes: i64) -> CoreResult<(u64, u64)> {
        let sessions = self.store.prune_sessions(session_retention_hours)?;
        let tool_calls = self.store.prune_tool_calls(tool_call_window_minutes)?;
        Ok((sessions, tool_calls))
    }
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
