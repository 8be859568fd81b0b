//! End-to-end scenarios driven through `Orchestrator::dispatch`, the same
//! entry point a tool server or hook process would use. Individual engines
//! have their own focused unit tests; these exercise the seams between them.

use agent_mesh::config::Config;
use agent_mesh::ids::Scope;
use agent_mesh::orchestrator::Orchestrator;
use agent_mesh::store::Store;
use serde_json::json;

fn fresh_orchestrator() -> Orchestrator {
    Orchestrator::new(Store::open_in_memory().unwrap(), Config::default())
}

#[test]
fn cross_project_self_join_is_denied_but_invite_crosses() {
    let orch = fresh_orchestrator();
    let p1 = orch.sessions().register_session("s1", Some("/work/p1"), None).unwrap();
    let p2 = orch.sessions().register_session("s2", Some("/work/p2"), None).unwrap();
    let p1_scope = p1.scope.as_handle_segment().to_string();
    let p2_scope = p2.scope.as_handle_segment().to_string();
    assert_ne!(p1_scope, p2_scope);

    orch.store().upsert_agent("alice", &p1_scope, "").unwrap();
    orch.store().upsert_agent("bob", &p2_scope, "").unwrap();

    let created = orch.dispatch(
        "create_channel",
        Some("bob"),
        Some("s2"),
        json!({"name": "dev", "access_type": "open"}),
    );
    assert!(created.ok, "{:?}", created.error);

    // S1: alice (p1) cannot self-join an open channel living in p2 without a link.
    let denied = orch.dispatch(
        "join_channel",
        Some("alice"),
        Some("s1"),
        json!({"channel": format!("{p2_scope}:dev")}),
    );
    assert!(!denied.ok);
    assert!(denied.error.as_deref().unwrap().contains("scope denied"), "{:?}", denied.error);

    // S2: a members-only channel in p1, created by alice, can invite bob from p2.
    let private = orch.dispatch(
        "create_channel",
        Some("alice"),
        Some("s1"),
        json!({"name": "private", "access_type": "members"}),
    );
    assert!(private.ok, "{:?}", private.error);

    let invited = orch.dispatch(
        "invite_to_channel",
        Some("alice"),
        Some("s1"),
        json!({"channel": format!("{p1_scope}:private"), "invitee": "bob", "invitee_scope": p2_scope}),
    );
    assert!(invited.ok, "{:?}", invited.error);
}

#[test]
fn dm_restricted_then_allowed_produces_canonical_handle() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("helen", "global", "").unwrap();
    orch.store().upsert_agent("ian", "global", "").unwrap();
    let restrict = orch.dispatch("set_dm_policy", Some("helen"), None, json!({"policy": "restricted"}));
    assert!(restrict.ok, "{:?}", restrict.error);

    let denied = orch.dispatch("create_or_get_dm", Some("ian"), None, json!({"with": "helen"}));
    assert!(!denied.ok);
    assert!(denied.error.as_deref().unwrap().contains("dm not allowed"), "{:?}", denied.error);

    let allow = orch.dispatch(
        "set_dm_permission",
        Some("helen"),
        None,
        json!({"agent": "ian", "kind": "allow"}),
    );
    assert!(allow.ok, "{:?}", allow.error);

    let retry = orch.dispatch("create_or_get_dm", Some("ian"), None, json!({"with": "helen"}));
    assert!(retry.ok, "{:?}", retry.error);
    let handle = retry.content.unwrap();
    assert!(handle.contains("\"handle\":\"dm:helen::ian:\""), "{handle}");
}

#[test]
fn block_denies_dm_in_both_directions() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("frank", "global", "").unwrap();
    orch.store().upsert_agent("grace", "global", "").unwrap();

    let block = orch.dispatch(
        "set_dm_permission",
        Some("frank"),
        None,
        json!({"agent": "grace", "kind": "block"}),
    );
    assert!(block.ok, "{:?}", block.error);

    let a = orch.dispatch("create_or_get_dm", Some("frank"), None, json!({"with": "grace"}));
    let b = orch.dispatch("create_or_get_dm", Some("grace"), None, json!({"with": "frank"}));
    assert!(!a.ok);
    assert!(!b.ok);
}

#[test]
fn notes_channel_is_lazily_created_and_private_to_its_owner() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("dana", "global", "").unwrap();
    orch.store().upsert_agent("mallory", "global", "").unwrap();

    let write = orch.dispatch("notes_write", Some("dana"), None, json!({"content": "remember the thing"}));
    assert!(write.ok, "{:?}", write.error);

    let read = orch.dispatch("notes_read", Some("dana"), None, json!({}));
    assert!(read.ok);
    assert!(read.content.unwrap().contains("remember the thing"));

    // The underlying channel handle isn't reachable through the bare-name
    // resolver a second agent would use, and it was created private.
    let stray_join = orch.dispatch(
        "join_channel",
        Some("mallory"),
        None,
        json!({"channel": "notes:dana:global"}),
    );
    assert!(!stray_join.ok);
}

#[test]
fn notes_peek_reads_a_target_agents_notebook_not_the_caller_own() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("dana", "global", "").unwrap();
    orch.store().upsert_agent("mallory", "global", "").unwrap();

    let write = orch.dispatch("notes_write", Some("dana"), None, json!({"content": "dana's secret"}));
    assert!(write.ok, "{:?}", write.error);

    // mallory, a META-style peeker, reads dana's notebook by name rather
    // than her own.
    let peek = orch.dispatch("notes_peek", Some("mallory"), None, json!({"agent": "dana"}));
    assert!(peek.ok, "{:?}", peek.error);
    assert!(peek.content.as_deref().unwrap().contains("dana's secret"));

    // mallory has written nothing of her own; peeking herself comes back empty.
    let self_peek = orch.dispatch("notes_peek", Some("mallory"), None, json!({"agent": "mallory"}));
    assert!(self_peek.ok, "{:?}", self_peek.error);
    assert!(!self_peek.content.as_deref().unwrap().contains("dana's secret"));
}

#[test]
fn tool_call_dedup_is_idempotent_within_the_window() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("alice", "global", "").unwrap();
    let args = json!({"name": "general", "access_type": "open"});

    let first = orch.dispatch("create_channel", Some("alice"), Some("sess1"), args.clone());
    assert!(first.ok);
    let second = orch.dispatch("create_channel", Some("alice"), Some("sess1"), args.clone());
    assert_eq!(second.dedup, Some(true));
    let third = orch.dispatch("create_channel", Some("alice"), Some("sess1"), args);
    assert_eq!(third.dedup, Some(true));
}

#[test]
fn session_hook_style_registration_then_get_current_project_round_trips() {
    let orch = fresh_orchestrator();
    let ctx = orch.sessions().register_session("sess1", Some("/home/alice/repo"), None).unwrap();
    assert!(matches!(ctx.scope, Scope::Project(_)));

    let current = orch.dispatch("get_current_project", None, Some("sess1"), json!({}));
    assert!(current.ok);
    let body: serde_json::Value = serde_json::from_str(&current.content.unwrap()).unwrap();
    assert_eq!(body["display_name"], "repo");

    let none_session = orch.dispatch("get_current_project", None, None, json!({}));
    assert!(none_session.ok);
    assert_eq!(none_session.content.unwrap(), "null");
}

#[test]
fn unknown_tool_is_rejected_without_touching_the_store() {
    let orch = fresh_orchestrator();
    let outcome = orch.dispatch("delete_everything", Some("alice"), None, json!({}));
    assert!(!outcome.ok);
    assert!(outcome.error.unwrap().contains("unknown tool"));
}

#[test]
fn send_message_then_search_then_get_round_trips_through_dispatch() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("alice", "global", "").unwrap();
    let created = orch.dispatch("create_channel", Some("alice"), None, json!({"name": "general", "access_type": "open"}));
    assert!(created.ok, "{:?}", created.error);
    let joined = orch.dispatch("join_channel", Some("alice"), None, json!({"channel": "general"}));
    assert!(joined.ok, "{:?}", joined.error);

    let sent = orch.dispatch("send_message", Some("alice"), None, json!({"channel": "general", "content": "deploy succeeded"}));
    assert!(sent.ok, "{:?}", sent.error);
    let id = serde_json::from_str::<serde_json::Value>(&sent.content.unwrap()).unwrap()["id"].as_i64().unwrap();

    let found = orch.dispatch("search", Some("alice"), None, json!({"query": "deploy"}));
    assert!(found.ok);
    let hits: serde_json::Value = serde_json::from_str(&found.content.unwrap()).unwrap();
    assert_eq!(hits.as_array().unwrap().len(), 1);

    let fetched = orch.dispatch("get_message", Some("alice"), None, json!({"id": id}));
    assert!(fetched.ok);
    let body: serde_json::Value = serde_json::from_str(&fetched.content.unwrap()).unwrap();
    assert_eq!(body["content"], "deploy succeeded");
}

#[test]
fn edit_message_then_delete_message_round_trip_through_dispatch() {
    let orch = fresh_orchestrator();
    orch.store().upsert_agent("alice", "global", "").unwrap();
    orch.store().upsert_agent("mallory", "global", "").unwrap();
    orch.dispatch("create_channel", Some("alice"), None, json!({"name": "general", "access_type": "open"}));
    orch.dispatch("join_channel", Some("alice"), None, json!({"channel": "general"}));
    orch.dispatch("join_channel", Some("mallory"), None, json!({"channel": "general"}));

    let sent = orch.dispatch("send_message", Some("alice"), None, json!({"channel": "general", "content": "v1"}));
    let id = serde_json::from_str::<serde_json::Value>(&sent.content.unwrap()).unwrap()["id"].as_i64().unwrap();

    let denied = orch.dispatch("edit_message", Some("mallory"), None, json!({"id": id, "content": "hijacked"}));
    assert!(!denied.ok);

    let edited = orch.dispatch("edit_message", Some("alice"), None, json!({"id": id, "content": "v2"}));
    assert!(edited.ok, "{:?}", edited.error);
    let body: serde_json::Value = serde_json::from_str(&edited.content.unwrap()).unwrap();
    assert_eq!(body["content"], "v2");
    assert_eq!(body["is_edited"], true);

    let deleted = orch.dispatch("delete_message", Some("alice"), None, json!({"id": id}));
    assert!(deleted.ok, "{:?}", deleted.error);
    let fetched = orch.dispatch("get_message", Some("mallory"), None, json!({"id": id}));
    let fetched_body: serde_json::Value = serde_json::from_str(&fetched.content.unwrap()).unwrap();
    assert_eq!(fetched_body["content"], "[Message deleted]");
}
