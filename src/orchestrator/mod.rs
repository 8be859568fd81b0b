//! Orchestrator (spec §4.7): the single flat dispatcher every external
//! surface (tool server, session hook) calls into. Resolves the caller,
//! resolves bare channel names into full handles, routes to the relevant
//! engine, and shapes the result into `{ok, content}` / `{ok:false, error}`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::channel::ChannelEngine;
use crate::config::Config;
use crate::discovery::DiscoveryEngine;
#[cfg(feature = "semantic")]
use crate::embedding::LazyEmbeddingService;
use crate::errors::{CoreError, CoreResult};
use crate::ids::{ChannelHandle, Scope};
use crate::message::MessageEngine;
use crate::search::{RankingProfile, SearchEngine, SearchFilters};
use crate::session::SessionEngine;
use crate::store::{AccessType, DmPermission, MessageRow, Store};

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup: Option<bool>,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self { ok: true, content: Some(content.into()), error: None, dedup: None }
    }

    fn ok_json(value: &impl Serialize) -> Self {
        Self::ok(serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()))
    }

    fn err(error: &CoreError) -> Self {
        Self { ok: false, content: None, error: Some(error.user_message()), dedup: None }
    }

    fn duplicate() -> Self {
        Self { ok: true, content: Some("duplicate".to_string()), error: None, dedup: Some(true) }
    }
}

/// Tools that require `agent_id` to be present and resolvable.
const AGENT_SCOPED_TOOLS: &[&str] = &[
    "create_channel", "join_channel", "leave_channel", "invite_to_channel", "archive_channel",
    "list_channels", "send_message", "send_dm", "get_message", "edit_message", "delete_message", "search",
    "notes_write", "notes_read", "notes_peek", "list_agents",
    "create_or_get_dm", "set_dm_permission", "set_dm_policy", "list_discoverable",
];

const EXEMPT_TOOLS: &[&str] = &["get_current_project", "list_projects", "get_linked_projects"];

pub struct Orchestrator {
    store: Store,
    config: Config,
    channels: ChannelEngine,
    messages: MessageEngine,
    discovery: DiscoveryEngine,
    sessions: SessionEngine,
    search: SearchEngine,
    #[cfg(feature = "semantic")]
    embedder: Option<std::sync::Arc<LazyEmbeddingService>>,
}

impl Orchestrator {
    pub fn new(store: Store, config: Config) -> Self {
        Self::sync_project_links(&store, &config);
        Self {
            channels: ChannelEngine::new(store.clone()),
            messages: MessageEngine::new(store.clone()),
            discovery: DiscoveryEngine::new(store.clone()),
            sessions: SessionEngine::new(store.clone()),
            search: SearchEngine::new(store.clone()),
            #[cfg(feature = "semantic")]
            embedder: Self::start_embedder(&config),
            store,
            config,
        }
    }

    /// Kick off background model loading when semantic search is configured
    /// on. A failed or still-loading embedder degrades every send/search to
    /// a no-op/lexical path rather than blocking or erroring (see
    /// `index_message` and the `search` tool branch below).
    #[cfg(feature = "semantic")]
    fn start_embedder(config: &Config) -> Option<std::sync::Arc<LazyEmbeddingService>> {
        if !config.semantic.enabled {
            return None;
        }
        Some(std::sync::Arc::new(LazyEmbeddingService::new(config.semantic.model.clone(), 10_000)))
    }

    /// Embed a freshly sent message and index it for semantic search. A
    /// no-op when semantic search is disabled or the model hasn't finished
    /// loading yet; failures are logged, never surfaced to the sender.
    #[cfg(feature = "semantic")]
    fn index_message(&self, row: &MessageRow) {
        let Some(embedder) = self.embedder.as_ref().and_then(|e| e.get()) else {
            return;
        };
        match embedder.embed_texts(&[row.content.as_str()]) {
            Ok(mut vectors) if !vectors.is_empty() => {
                let embedding = vectors.remove(0);
                if let Err(e) = self.store.upsert_embedding(
                    row.id,
                    &row.channel,
                    &row.sender_name,
                    &row.sender_scope,
                    &row.created_at,
                    row.intent_type.as_deref(),
                    row.confidence,
                    &embedding,
                ) {
                    tracing::warn!(message_id = row.id, error = %e, "failed to persist message embedding");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(message_id = row.id, error = %e, "failed to embed message"),
        }
    }

    #[cfg(not(feature = "semantic"))]
    fn index_message(&self, _row: &MessageRow) {}

    /// Resolve the query embedding and ranking profile for the `search`
    /// tool when semantic search is enabled and ready; `None` means the
    /// caller should fall back to lexical search.
    #[cfg(feature = "semantic")]
    fn semantic_query(&self, query: &str, profile_name: Option<&str>) -> Option<(Vec<f32>, RankingProfile)> {
        if !self.config.semantic.enabled {
            return None;
        }
        let embedder = self.embedder.as_ref()?.get()?;
        let embedding = match embedder.embed_query(query) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to embed search query, falling back to lexical search");
                return None;
            }
        };
        let name = profile_name.unwrap_or(&self.config.semantic.default_profile);
        let profile = RankingProfile::named(name)
            .unwrap_or(RankingProfile::BALANCED)
            .with_half_life_override(self.config.semantic.half_life_hours_override);
        Some((embedding, profile))
    }

    #[cfg(not(feature = "semantic"))]
    fn semantic_query(&self, _query: &str, _profile_name: Option<&str>) -> Option<(Vec<f32>, RankingProfile)> {
        None
    }

    /// Reconcile `config.project_links` into the Store's `project_links`
    /// table. Disabled entries are simply not written — `Store` has no
    /// notion of a disabled link, only an absent one. Idempotent: re-running
    /// with the same config just re-upserts the same rows.
    fn sync_project_links(store: &Store, config: &Config) {
        for link in &config.project_links {
            if !link.enabled {
                continue;
            }
            let link_type = match link.link_type {
                crate::config::LinkType::Bidirectional => crate::store::LinkType::Bidirectional,
                crate::config::LinkType::AToB => crate::store::LinkType::AToB,
                crate::config::LinkType::BToA => crate::store::LinkType::BToA,
            };
            if let Err(e) = store.add_project_link(&link.source, &link.target, link_type) {
                tracing::warn!(source = %link.source, target = %link.target, error = %e, "failed to sync configured project link");
            }
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sessions(&self) -> &SessionEngine {
        &self.sessions
    }

    /// Bare names become scope-qualified; anything containing `:` is assumed
    /// to already be a handle.
    fn resolve_channel_ref(&self, raw: &str, scope: &Scope) -> String {
        if raw.contains(':') {
            return raw.to_string();
        }
        match scope {
            Scope::Global => ChannelHandle::global(raw).to_string(),
            Scope::Project(id) => ChannelHandle::project(id.clone(), raw).to_string(),
        }
    }

    fn ensure_notes_channel(&self, agent_name: &str, agent_scope: &Scope) -> CoreResult<String> {
        let handle = ChannelHandle::notes(agent_name, agent_scope.clone()).to_string();
        if self.store.get_channel(&handle)?.is_none() {
            self.store.create_channel(
                &handle,
                "notes",
                AccessType::Private,
                agent_scope.as_handle_segment(),
                &handle,
                "",
                false,
                Some(agent_name),
                Some(agent_scope.as_handle_segment()),
            )?;
            self.store.add_member(
                &handle,
                agent_name,
                agent_scope.as_handle_segment(),
                "system",
                "system",
                false,
                true,
                false,
                false,
                false,
            )?;
        }
        Ok(handle)
    }

    /// Dispatch a named tool call. `session_id`, when given, is used to
    /// resolve the caller's project scope and to record tool-call dedup.
    pub fn dispatch(&self, tool: &str, agent_id: Option<&str>, session_id: Option<&str>, args: Value) -> ToolOutcome {
        if AGENT_SCOPED_TOOLS.contains(&tool) {
            let Some(agent_id) = agent_id else {
                return ToolOutcome::err(&CoreError::InvalidInput("agent_id is required".to_string()));
            };
            match self.sessions.resolve_caller(agent_id, session_id) {
                Ok((name, scope, is_new)) => {
                    if let Scope::Project(id) = &scope {
                        if let Err(e) = self.store.touch_project(id) {
                            tracing::warn!(project = %id, error = %e, "failed to update project last-active");
                        }
                    }
                    if is_new {
                        match self.channels.apply_defaults(&name, &scope, &[]) {
                            Ok(joined) => tracing::info!(agent = %name, scope = %scope, count = joined.len(), "applied default channels for newly-registered agent"),
                            Err(e) => tracing::warn!(agent = %name, scope = %scope, error = %e, "failed to apply default channels"),
                        }
                    }
                    if let Some(session_id) = session_id {
                        let digest_inputs = json!({ "tool": tool, "args": &args });
                        match self.sessions.record_tool_call(session_id, tool, &digest_inputs, self.config.dedup_window_minutes) {
                            Ok(crate::store::DedupOutcome::Duplicate) => return ToolOutcome::duplicate(),
                            Ok(crate::store::DedupOutcome::Recorded) => {}
                            Err(e) => return ToolOutcome::err(&e),
                        }
                    }
                    self.dispatch_for_agent(tool, &name, &scope, args)
                }
                Err(e) => ToolOutcome::err(&e),
            }
        } else if EXEMPT_TOOLS.contains(&tool) {
            self.dispatch_exempt(tool, session_id, args)
        } else {
            ToolOutcome::err(&CoreError::InvalidInput(format!("unknown tool: {tool}")))
        }
    }

    fn dispatch_exempt(&self, tool: &str, session_id: Option<&str>, _args: Value) -> ToolOutcome {
        match tool {
            "get_current_project" => {
                let Some(session_id) = session_id else {
                    return ToolOutcome::ok_json(&json!(null));
                };
                match self.sessions.get_session_context(session_id) {
                    Ok(ctx) => {
                        let project = ctx.and_then(|c| c.project).map(|p| {
                            json!({"id": p.id, "path": p.path, "display_name": p.display_name})
                        });
                        ToolOutcome::ok_json(&project)
                    }
                    Err(e) => ToolOutcome::err(&e),
                }
            }
            "list_projects" => match self.store.list_projects() {
                Ok(rows) => ToolOutcome::ok_json(&rows.iter().map(|r| &r.id).collect::<Vec<_>>()),
                Err(e) => ToolOutcome::err(&CoreError::from(e)),
            },
            "get_linked_projects" => match self.store.list_project_links() {
                Ok(rows) => ToolOutcome::ok_json(
                    &rows
                        .iter()
                        .map(|r| json!({"source": r.source, "target": r.target, "type": r.link_type.as_str()}))
                        .collect::<Vec<_>>(),
                ),
                Err(e) => ToolOutcome::err(&CoreError::from(e)),
            },
            _ => ToolOutcome::err(&CoreError::InvalidInput(format!("unknown tool: {tool}"))),
        }
    }

    fn dispatch_for_agent(&self, tool: &str, name: &str, scope: &Scope, args: Value) -> ToolOutcome {
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        let result: CoreResult<ToolOutcome> = (|| {
            Ok(match tool {
                "create_channel" => {
                    let channel_name = str_arg("name").ok_or_else(|| CoreError::InvalidInput("name is required".to_string()))?;
                    let access_type = match str_arg("access_type").as_deref() {
                        Some("members") => AccessType::Members,
                        Some("private") => AccessType::Private,
                        _ => AccessType::Open,
                    };
                    let is_default = args.get("is_default").and_then(Value::as_bool).unwrap_or(false);
                    let description = str_arg("description").unwrap_or_default();
                    let row = self.channels.create_channel(&channel_name, scope, access_type, Some((name, scope)), is_default, &description)?;
                    ToolOutcome::ok_json(&row_to_json(&row))
                }
                "join_channel" => {
                    let channel = self.resolve_channel_ref(&str_arg("channel").ok_or_else(|| CoreError::InvalidInput("channel is required".to_string()))?, scope);
                    self.channels.join_channel(name, scope, &channel)?;
                    ToolOutcome::ok("joined")
                }
                "leave_channel" => {
                    let channel = self.resolve_channel_ref(&str_arg("channel").ok_or_else(|| CoreError::InvalidInput("channel is required".to_string()))?, scope);
                    self.channels.leave_channel(name, scope, &channel)?;
                    ToolOutcome::ok("left")
                }
                "invite_to_channel" => {
                    let channel = self.resolve_channel_ref(&str_arg("channel").ok_or_else(|| CoreError::InvalidInput("channel is required".to_string()))?, scope);
                    let invitee = str_arg("invitee").ok_or_else(|| CoreError::InvalidInput("invitee is required".to_string()))?;
                    let invitee_scope = str_arg("invitee_scope").map(|s| Scope::from_segment(&s)).unwrap_or_else(|| scope.clone());
                    self.channels.invite_to_channel(&channel, &invitee, &invitee_scope, name, scope)?;
                    ToolOutcome::ok("invited")
                }
                "archive_channel" => {
                    let channel = self.resolve_channel_ref(&str_arg("channel").ok_or_else(|| CoreError::InvalidInput("channel is required".to_string()))?, scope);
                    self.channels.archive_channel(name, scope, &channel)?;
                    ToolOutcome::ok("archived")
                }
                "list_channels" => {
                    let rows = self.channels.list_available_channels(name, scope)?;
                    ToolOutcome::ok_json(
                        &rows
                            .iter()
                            .map(|a| json!({"channel": row_to_json(&a.channel), "is_member": a.is_member, "can_join": a.can_join, "access_reason": a.access_reason}))
                            .collect::<Vec<_>>(),
                    )
                }
                "send_message" => {
                    let channel = self.resolve_channel_ref(&str_arg("channel").ok_or_else(|| CoreError::InvalidInput("channel is required".to_string()))?, scope);
                    let content = str_arg("content").ok_or_else(|| CoreError::InvalidInput("content is required".to_string()))?;
                    let thread = str_arg("thread");
                    let confidence = args.get("confidence").and_then(Value::as_f64);
                    let intent_type = str_arg("intent_type");
                    let row = self.messages.send(&channel, name, scope, &content, thread.as_deref(), confidence, intent_type.as_deref())?;
                    self.index_message(&row);
                    ToolOutcome::ok_json(&json!({"id": row.id}))
                }
                "send_dm" => {
                    let other = str_arg("to").ok_or_else(|| CoreError::InvalidInput("to is required".to_string()))?;
                    let other_scope = str_arg("to_scope").map(|s| Scope::from_segment(&s)).unwrap_or_else(|| scope.clone());
                    let content = str_arg("content").ok_or_else(|| CoreError::InvalidInput("content is required".to_string()))?;
                    let channel = self.discovery.create_or_get_dm(name, scope, &other, &other_scope)?;
                    let row = self.messages.send(&channel.handle, name, scope, &content, None, None, None)?;
                    self.index_message(&row);
                    ToolOutcome::ok_json(&json!({"id": row.id, "channel": channel.handle}))
                }
                "get_message" => {
                    let id = args.get("id").and_then(Value::as_i64).ok_or_else(|| CoreError::InvalidInput("id is required".to_string()))?;
                    let row = self.messages.get(id, Some((name, scope)))?;
                    ToolOutcome::ok_json(&message_to_json(&row))
                }
                "edit_message" => {
                    let id = args.get("id").and_then(Value::as_i64).ok_or_else(|| CoreError::InvalidInput("id is required".to_string()))?;
                    let content = str_arg("content").ok_or_else(|| CoreError::InvalidInput("content is required".to_string()))?;
                    let row = self.messages.edit(id, name, scope, &content)?;
                    ToolOutcome::ok_json(&message_to_json(&row))
                }
                "delete_message" => {
                    let id = args.get("id").and_then(Value::as_i64).ok_or_else(|| CoreError::InvalidInput("id is required".to_string()))?;
                    self.messages.soft_delete(id, name, scope)?;
                    ToolOutcome::ok("deleted")
                }
                "search" => {
                    let query = str_arg("query").unwrap_or_default();
                    let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(50);
                    let filters = SearchFilters { limit, ..Default::default() };
                    let profile_name = str_arg("profile");
                    match self.semantic_query(&query, profile_name.as_deref()) {
                        Some((embedding, profile)) => {
                            let rows = self.search.search_semantic(name, scope, &embedding, profile, &filters)?;
                            ToolOutcome::ok_json(&rows.iter().map(|r| message_to_json(&r.message)).collect::<Vec<_>>())
                        }
                        None => {
                            if self.config.semantic.enabled {
                                tracing::warn!(tool = "search", "semantic search unavailable, falling back to lexical");
                            }
                            let rows = self.search.search_lexical(name, scope, &query, &filters)?;
                            ToolOutcome::ok_json(&rows.iter().map(message_to_json).collect::<Vec<_>>())
                        }
                    }
                }
                "notes_write" => {
                    let handle = self.ensure_notes_channel(name, scope)?;
                    let content = str_arg("content").ok_or_else(|| CoreError::InvalidInput("content is required".to_string()))?;
                    let row = self.messages.send(&handle, name, scope, &content, None, None, None)?;
                    self.index_message(&row);
                    ToolOutcome::ok_json(&json!({"id": row.id}))
                }
                "notes_read" => {
                    let handle = self.ensure_notes_channel(name, scope)?;
                    let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(20);
                    let rows = self.messages.list(&handle, limit, None)?;
                    ToolOutcome::ok_json(&rows.iter().map(message_to_json).collect::<Vec<_>>())
                }
                "notes_peek" => {
                    let target = str_arg("agent").ok_or_else(|| CoreError::InvalidInput("agent is required".to_string()))?;
                    let target_scope = str_arg("agent_scope").map(|s| Scope::from_segment(&s)).unwrap_or_else(|| scope.clone());
                    let handle = ChannelHandle::notes(target, target_scope).to_string();
                    let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(20);
                    let rows = self.messages.list(&handle, limit, None)?;
                    ToolOutcome::ok_json(&rows.iter().map(message_to_json).collect::<Vec<_>>())
                }
                "list_agents" => {
                    let rows = self.discovery.list_discoverable(name, scope, false)?;
                    ToolOutcome::ok_json(
                        &rows
                            .iter()
                            .map(|e| json!({"name": e.name, "scope": e.scope.as_handle_segment(), "dm_availability": format!("{:?}", e.dm_availability), "has_existing_dm": e.has_existing_dm}))
                            .collect::<Vec<_>>(),
                    )
                }
                "create_or_get_dm" => {
                    let other = str_arg("with").ok_or_else(|| CoreError::InvalidInput("with is required".to_string()))?;
                    let other_scope = str_arg("with_scope").map(|s| Scope::from_segment(&s)).unwrap_or_else(|| scope.clone());
                    let row = self.discovery.create_or_get_dm(name, scope, &other, &other_scope)?;
                    ToolOutcome::ok_json(&row_to_json(&row))
                }
                "set_dm_permission" => {
                    let other = str_arg("agent").ok_or_else(|| CoreError::InvalidInput("agent is required".to_string()))?;
                    let other_scope = str_arg("agent_scope").map(|s| Scope::from_segment(&s)).unwrap_or_else(|| scope.clone());
                    let kind = match str_arg("kind").as_deref() {
                        Some("block") => DmPermission::Block,
                        _ => DmPermission::Allow,
                    };
                    let reason = str_arg("reason").unwrap_or_default();
                    self.discovery.set_dm_permission(name, scope, &other, &other_scope, kind, &reason)?;
                    ToolOutcome::ok("updated")
                }
                "set_dm_policy" => {
                    let policy = str_arg("policy").ok_or_else(|| CoreError::InvalidInput("policy is required".to_string()))?;
                    self.discovery.set_dm_policy(name, scope, &policy)?;
                    ToolOutcome::ok("updated")
                }
                "list_discoverable" => {
                    let filter_by_dm = args.get("filter_by_dm").and_then(Value::as_bool).unwrap_or(false);
                    let rows = self.discovery.list_discoverable(name, scope, filter_by_dm)?;
                    ToolOutcome::ok_json(
                        &rows
                            .iter()
                            .map(|e| json!({"name": e.name, "scope": e.scope.as_handle_segment(), "dm_availability": format!("{:?}", e.dm_availability), "has_existing_dm": e.has_existing_dm}))
                            .collect::<Vec<_>>(),
                    )
                }
                other => return Err(CoreError::InvalidInput(format!("unknown tool: {other}"))),
            })
        })();
        result.unwrap_or_else(|e| ToolOutcome::err(&e))
    }
}

fn row_to_json(row: &crate::store::ChannelRow) -> Value {
    json!({
        "handle": row.handle,
        "channel_type": row.channel_type,
        "access_type": row.access_type,
        "scope": row.scope,
        "name": row.name,
        "description": row.description,
        "is_default": row.is_default,
        "archived": row.archived,
    })
}

fn message_to_json(row: &crate::store::MessageRow) -> Value {
    json!({
        "id": row.id,
        "channel": row.channel,
        "sender": row.sender_name,
        "sender_scope": row.sender_scope,
        "content": row.content,
        "created_at": row.created_at,
        "is_edited": row.is_edited,
        "metadata": serde_json::from_str::<Value>(&row.metadata).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        let store = Store::open_in_memory().unwrap();
        Orchestrator::new(store, Config::default())
    }

    #[test]
    fn missing_agent_id_on_scoped_tool_is_invalid_input() {
        let orch = orchestrator();
        let outcome = orch.dispatch("create_channel", None, None, json!({"name": "general"}));
        assert!(!outcome.ok);
    }

    #[test]
    fn unknown_agent_is_auto_registered_rather_than_rejected() {
        let orch = orchestrator();
        let outcome = orch.dispatch("list_channels", Some("ghost"), None, json!({}));
        assert!(outcome.ok, "{:?}", outcome.error);
        assert!(orch.store().get_agent("ghost", "global").unwrap().is_some());
    }

    #[test]
    fn new_agent_joins_configured_default_channels_on_first_call() {
        let store = Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.default_channels.global.push(crate::config::NamedChannel {
            name: "announcements".to_string(),
            is_default: true,
            description: String::new(),
        });
        let orch = Orchestrator::new(store, config);
        orch.store().create_channel(
            "global:announcements", "channel", AccessType::Open, "global", "announcements", "", true, None, None,
        ).unwrap();
        let outcome = orch.dispatch("list_channels", Some("newbie"), None, json!({}));
        assert!(outcome.ok, "{:?}", outcome.error);
        let content = outcome.content.unwrap();
        let rows: serde_json::Value = serde_json::from_str(&content).unwrap();
        let announcements = rows
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["channel"]["handle"] == "global:announcements")
            .expect("announcements channel listed");
        assert_eq!(announcements["is_member"], true);

        let dup = orch.dispatch("list_channels", Some("newbie"), None, json!({}));
        assert!(dup.ok);
    }

    #[test]
    fn create_channel_then_send_message_roundtrips() {
        let orch = orchestrator();
        orch.store().upsert_agent("alice", "global", "").unwrap();
        let created = orch.dispatch("create_channel", Some("alice"), None, json!({"name": "general", "access_type": "open"}));
        assert!(created.ok, "{:?}", created.error);
        orch.channels.join_channel("alice", &Scope::Global, "global:general").unwrap();
        let sent = orch.dispatch("send_message", Some("alice"), None, json!({"channel": "general", "content": "hello"}));
        assert!(sent.ok, "{:?}", sent.error);
    }

    #[test]
    fn archive_channel_removes_it_from_available_listing() {
        let orch = orchestrator();
        orch.store().upsert_agent("alice", "global", "").unwrap();
        let created = orch.dispatch("create_channel", Some("alice"), None, json!({"name": "general", "access_type": "members"}));
        assert!(created.ok, "{:?}", created.error);
        let archived = orch.dispatch("archive_channel", Some("alice"), None, json!({"channel": "general"}));
        assert!(archived.ok, "{:?}", archived.error);
        let listed = orch.dispatch("list_channels", Some("alice"), None, json!({}));
        let content = listed.content.unwrap();
        let rows: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert!(rows.as_array().unwrap().iter().all(|r| r["channel"]["handle"] != "global:general"));
    }

    #[test]
    fn dispatch_touches_project_last_active_for_project_scoped_callers() {
        let orch = orchestrator();
        let ctx = orch.sessions().register_session("sess1", Some("/home/alice/repo"), None).unwrap();
        let project_id = ctx.scope.as_handle_segment().to_string();
        let before = orch.store().get_project(&project_id).unwrap().unwrap().last_active;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let outcome = orch.dispatch("list_channels", Some("alice"), Some("sess1"), json!({}));
        assert!(outcome.ok, "{:?}", outcome.error);
        let after = orch.store().get_project(&project_id).unwrap().unwrap().last_active;
        assert!(after >= before);
    }

    #[test]
    fn exempt_tools_do_not_require_agent_id() {
        let orch = orchestrator();
        let outcome = orch.dispatch("list_projects", None, None, json!({}));
        assert!(outcome.ok);
    }

    #[test]
    fn configured_project_links_are_synced_on_construction() {
        let store = Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.project_links.push(crate::config::ProjectLinkConfig {
            source: "proj-a".to_string(),
            target: "proj-b".to_string(),
            link_type: crate::config::LinkType::AToB,
            enabled: true,
        });
        config.project_links.push(crate::config::ProjectLinkConfig {
            source: "proj-c".to_string(),
            target: "proj-d".to_string(),
            link_type: crate::config::LinkType::Bidirectional,
            enabled: false,
        });
        let _orch = Orchestrator::new(store.clone(), config);
        assert_eq!(
            store.find_project_link("proj-a", "proj-b").unwrap(),
            Some(crate::store::LinkType::AToB)
        );
        assert_eq!(store.find_project_link("proj-c", "proj-d").unwrap(), None);
    }

    #[cfg(feature = "semantic")]
    #[tokio::test]
    async fn search_falls_back_to_lexical_while_model_is_still_loading() {
        let store = Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.semantic.enabled = true;
        let orch = Orchestrator::new(store, config);
        orch.store().upsert_agent("alice", "global", "").unwrap();
        orch.dispatch("create_channel", Some("alice"), None, json!({"name": "general", "access_type": "open"}));
        orch.channels.join_channel("alice", &Scope::Global, "global:general").unwrap();
        orch.dispatch("send_message", Some("alice"), None, json!({"channel": "general", "content": "deploy succeeded"}));
        // The embedding model is still initializing in the background right
        // after construction, so this must degrade to lexical rather than
        // error or return nothing.
        let found = orch.dispatch("search", Some("alice"), None, json!({"query": "deploy"}));
        assert!(found.ok, "{:?}", found.error);
    }

    #[test]
    fn duplicate_tool_call_is_reported_not_rejected() {
        let orch = orchestrator();
        orch.store().upsert_agent("alice", "global", "").unwrap();
        let args = json!({"name": "general", "access_type": "open"});
        let first = orch.dispatch("create_channel", Some("alice"), Some("sess1"), args.clone());
        assert!(first.ok);
        let second = orch.dispatch("create_channel", Some("alice"), Some("sess1"), args);
        assert_eq!(second.dedup, Some(true));
    }
}
