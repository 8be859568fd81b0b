//! Schema DDL and migration runner.

pub const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_active TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    name TEXT NOT NULL,
    scope TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'online',
    dm_policy TEXT NOT NULL DEFAULT 'open',
    discoverability TEXT NOT NULL DEFAULT 'public',
    metadata TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (name, scope)
);

CREATE TABLE IF NOT EXISTS project_links (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    link_type TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (source, target)
);

CREATE TABLE IF NOT EXISTS channels (
    handle TEXT PRIMARY KEY,
    channel_type TEXT NOT NULL,
    access_type TEXT NOT NULL,
    scope TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_default INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    creator_name TEXT,
    creator_scope TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channel_members (
    channel TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    agent_scope TEXT NOT NULL,
    invited_by TEXT NOT NULL,
    source TEXT NOT NULL,
    can_leave INTEGER NOT NULL,
    can_send INTEGER NOT NULL,
    can_invite INTEGER NOT NULL,
    can_manage INTEGER NOT NULL,
    is_from_default INTEGER NOT NULL DEFAULT 0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (channel, agent_name, agent_scope)
);
CREATE INDEX IF NOT EXISTS idx_channel_members_agent ON channel_members(agent_name, agent_scope);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    sender_scope TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    thread_handle TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    is_edited INTEGER NOT NULL DEFAULT 0,
    edited_at TEXT,
    confidence REAL,
    intent_type TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel, id);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_name, sender_scope);

CREATE TABLE IF NOT EXISTS dm_permissions (
    owner_name TEXT NOT NULL,
    owner_scope TEXT NOT NULL,
    other_name TEXT NOT NULL,
    other_scope TEXT NOT NULL,
    permission TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (owner_name, owner_scope, other_name, other_scope)
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project TEXT,
    project_path TEXT,
    project_name TEXT,
    transcript_path TEXT,
    scope TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS tool_calls (
    session TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    digest TEXT NOT NULL,
    called_at TEXT NOT NULL,
    PRIMARY KEY (session, tool_name, digest)
);

CREATE TABLE IF NOT EXISTS vector_index (
    message_id INTEGER PRIMARY KEY,
    channel TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    sender_scope TEXT NOT NULL,
    created_at TEXT NOT NULL,
    intent_type TEXT,
    confidence REAL,
    embedding BLOB NOT NULL
);
";

pub fn migrate(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_V1)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (1, ?1)",
        [chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
