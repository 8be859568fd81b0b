//! The transactional store: a pooled `rusqlite` connection set behind a
//! single-writer discipline, plus the row-level primitives spec'd for the
//! mesh's data model.
//!
//! Every higher engine (channel, message, discovery, session, search) talks
//! to the world only through this module. Concurrency follows this
//! codebase's connection-pool pattern (`r2d2` + `r2d2_sqlite`): many pooled
//! connections for reads, `busy_timeout` plus short transactions so the
//! single physical writer never starves readers for long.

mod schema;
pub mod types;

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::StoreError;
pub use types::{
    AccessType, AgentRow, ChannelMemberRow, ChannelRow, DedupOutcome, DmPermission, EmbeddingRow,
    LinkType, MessageRow, ProjectLinkRow, ProjectRow, SessionRow,
};

type Result<T> = std::result::Result<T, StoreError>;

/// Sentinel content a soft-deleted message's row is overwritten with.
pub const DELETED_SENTINEL: &str = "[Message deleted]";

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Other(e.into()))?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        Self::from_manager(manager)
    }

    pub fn open_in_memory() -> Result<Self> {
        // A single shared in-memory database requires a named URI; plain
        // `:memory:` gives every pooled connection its own empty database.
        let manager = SqliteConnectionManager::file("file::memory:?cache=shared")
            .with_flags(rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));
        Self::from_manager(manager)
    }

    fn from_manager(manager: SqliteConnectionManager) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(8)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
        let conn = pool.get().map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
        schema::migrate(&conn)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| StoreError::Other(anyhow::anyhow!(e)))
    }

    // ---- projects ---------------------------------------------------

    pub fn register_project(&self, id: &str, path: &str, display_name: &str) -> Result<ProjectRow> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO projects (id, path, display_name, created_at, last_active)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET last_active = excluded.last_active",
            params![id, path, display_name, now],
        )?;
        self.get_project(id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, path, display_name, created_at, last_active FROM projects WHERE id = ?1",
            [id],
            |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    display_name: row.get(2)?,
                    created_at: row.get(3)?,
                    last_active: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn touch_project(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE projects SET last_active = ?2 WHERE id = ?1",
            params![id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, path, display_name, created_at, last_active FROM projects ORDER BY last_active DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    display_name: row.get(2)?,
                    created_at: row.get(3)?,
                    last_active: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- agents -------------------------------------------------------

    pub fn upsert_agent(&self, name: &str, scope: &str, description: &str) -> Result<AgentRow> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agents (name, scope, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(name, scope) DO UPDATE SET description = excluded.description",
            params![name, scope, description],
        )?;
        self.get_agent(name, scope)?.ok_or(StoreError::NotFound)
    }

    pub fn get_agent(&self, name: &str, scope: &str) -> Result<Option<AgentRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT name, scope, description, status, dm_policy, discoverability, metadata
             FROM agents WHERE name = ?1 AND scope = ?2",
            params![name, scope],
            Self::row_to_agent,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_agents_in_scope(&self, scope: &str) -> Result<Vec<AgentRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, scope, description, status, dm_policy, discoverability, metadata
             FROM agents WHERE scope = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([scope], Self::row_to_agent)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_agent_dm_policy(&self, name: &str, scope: &str, policy: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE agents SET dm_policy = ?3 WHERE name = ?1 AND scope = ?2",
            params![name, scope, policy],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_agent_discoverability(&self, name: &str, scope: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE agents SET discoverability = ?3 WHERE name = ?1 AND scope = ?2",
            params![name, scope, value],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentRow> {
        Ok(AgentRow {
            name: row.get(0)?,
            scope: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            dm_policy: row.get(4)?,
            discoverability: row.get(5)?,
            metadata: row.get(6)?,
        })
    }

    // ---- project links --------------------------------------------------

    pub fn add_project_link(&self, source: &str, target: &str, link_type: LinkType) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO project_links (source, target, link_type, enabled) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(source, target) DO UPDATE SET link_type = excluded.link_type, enabled = 1",
            params![source, target, link_type.as_str()],
        )?;
        Ok(())
    }

    pub fn list_project_links(&self) -> Result<Vec<ProjectLinkRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT source, target, link_type, enabled FROM project_links WHERE enabled = 1")?;
        let rows = stmt
            .query_map([], |row| {
                let link_type_str: String = row.get(2)?;
                Ok(ProjectLinkRow {
                    source: row.get(0)?,
                    target: row.get(1)?,
                    link_type: LinkType::from_str_opt(&link_type_str)
                        .unwrap_or(LinkType::Bidirectional),
                    enabled: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Direct (non-transitive) link between two scopes, in either direction,
    /// with the direction relative to `(from, to)` as given.
    pub fn find_project_link(&self, from: &str, to: &str) -> Result<Option<LinkType>> {
        let conn = self.conn()?;
        let direct: Option<String> = conn
            .query_row(
                "SELECT link_type FROM project_links WHERE source = ?1 AND target = ?2 AND enabled = 1",
                params![from, to],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(lt) = direct {
            return Ok(LinkType::from_str_opt(&lt));
        }
        let reverse: Option<String> = conn
            .query_row(
                "SELECT link_type FROM project_links WHERE source = ?1 AND target = ?2 AND enabled = 1",
                params![to, from],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reverse.and_then(|lt| LinkType::from_str_opt(&lt)).map(|lt| match lt {
            LinkType::AToB => LinkType::BToA,
            LinkType::BToA => LinkType::AToB,
            LinkType::Bidirectional => LinkType::Bidirectional,
        }))
    }

    // ---- channels ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_channel(
        &self,
        handle: &str,
        channel_type: &str,
        access_type: AccessType,
        scope: &str,
        name: &str,
        description: &str,
        is_default: bool,
        creator_name: Option<&str>,
        creator_scope: Option<&str>,
    ) -> Result<ChannelRow> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO channels
             (handle, channel_type, access_type, scope, name, description, is_default, archived,
              creator_name, creator_scope, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)",
            params![
                handle,
                channel_type,
                access_type.as_str(),
                scope,
                name,
                description,
                i64::from(is_default),
                creator_name,
                creator_scope,
                now
            ],
        )?;
        if inserted == 0 {
            return self.get_channel(handle)?.ok_or(StoreError::NotFound);
        }
        self.get_channel(handle)?.ok_or(StoreError::NotFound)
    }

    pub fn get_channel(&self, handle: &str) -> Result<Option<ChannelRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT handle, channel_type, access_type, scope, name, description, is_default,
                    archived, creator_name, creator_scope, created_at
             FROM channels WHERE handle = ?1",
            [handle],
            Self::row_to_channel,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_channels_in_scope(&self, scope: &str, include_archived: bool) -> Result<Vec<ChannelRow>> {
        let conn = self.conn()?;
        let sql = if include_archived {
            "SELECT handle, channel_type, access_type, scope, name, description, is_default,
                    archived, creator_name, creator_scope, created_at
             FROM channels WHERE scope = ?1 ORDER BY name"
        } else {
            "SELECT handle, channel_type, access_type, scope, name, description, is_default,
                    archived, creator_name, creator_scope, created_at
             FROM channels WHERE scope = ?1 AND archived = 0 ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([scope], Self::row_to_channel)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn archive_channel(&self, handle: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE channels SET archived = 1 WHERE handle = ?1", [handle])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<ChannelRow> {
        Ok(ChannelRow {
            handle: row.get(0)?,
            channel_type: row.get(1)?,
            access_type: row.get(2)?,
            scope: row.get(3)?,
            name: row.get(4)?,
            description: row.get(5)?,
            is_default: row.get::<_, i64>(6)? != 0,
            archived: row.get::<_, i64>(7)? != 0,
            creator_name: row.get(8)?,
            creator_scope: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    // ---- channel membership --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_member(
        &self,
        channel: &str,
        agent_name: &str,
        agent_scope: &str,
        invited_by: &str,
        source: &str,
        can_leave: bool,
        can_send: bool,
        can_invite: bool,
        can_manage: bool,
        is_from_default: bool,
    ) -> Result<ChannelMemberRow> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO channel_members
             (channel, agent_name, agent_scope, invited_by, source, can_leave, can_send,
              can_invite, can_manage, is_from_default, is_muted, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)
             ON CONFLICT(channel, agent_name, agent_scope) DO NOTHING",
            params![
                channel,
                agent_name,
                agent_scope,
                invited_by,
                source,
                i64::from(can_leave),
                i64::from(can_send),
                i64::from(can_invite),
                i64::from(can_manage),
                i64::from(is_from_default),
                now
            ],
        )?;
        self.get_member(channel, agent_name, agent_scope)?
            .ok_or(StoreError::NotFound)
    }

    pub fn remove_member(&self, channel: &str, agent_name: &str, agent_scope: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM channel_members WHERE channel = ?1 AND agent_name = ?2 AND agent_scope = ?3",
            params![channel, agent_name, agent_scope],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_member(&self, channel: &str, agent_name: &str, agent_scope: &str) -> Result<Option<ChannelMemberRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT channel, agent_name, agent_scope, invited_by, source, can_leave, can_send,
                    can_invite, can_manage, is_from_default, is_muted, joined_at
             FROM channel_members WHERE channel = ?1 AND agent_name = ?2 AND agent_scope = ?3",
            params![channel, agent_name, agent_scope],
            Self::row_to_member,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_members(&self, channel: &str) -> Result<Vec<ChannelMemberRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel, agent_name, agent_scope, invited_by, source, can_leave, can_send,
                    can_invite, can_manage, is_from_default, is_muted, joined_at
             FROM channel_members WHERE channel = ?1 ORDER BY joined_at",
        )?;
        let rows = stmt
            .query_map([channel], Self::row_to_member)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every (channel, membership) pair for an agent — the raw feed for the
    /// `agent_channels` view.
    pub fn list_memberships_for_agent(&self, agent_name: &str, agent_scope: &str) -> Result<Vec<(ChannelRow, ChannelMemberRow)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.handle, c.channel_type, c.access_type, c.scope, c.name, c.description,
                    c.is_default, c.archived, c.creator_name, c.creator_scope, c.created_at,
                    m.channel, m.agent_name, m.agent_scope, m.invited_by, m.source, m.can_leave,
                    m.can_send, m.can_invite, m.can_manage, m.is_from_default, m.is_muted, m.joined_at
             FROM channel_members m JOIN channels c ON c.handle = m.channel
             WHERE m.agent_name = ?1 AND m.agent_scope = ?2
             ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map(params![agent_name, agent_scope], |row| {
                let channel = ChannelRow {
                    handle: row.get(0)?,
                    channel_type: row.get(1)?,
                    access_type: row.get(2)?,
                    scope: row.get(3)?,
                    name: row.get(4)?,
                    description: row.get(5)?,
                    is_default: row.get::<_, i64>(6)? != 0,
                    archived: row.get::<_, i64>(7)? != 0,
                    creator_name: row.get(8)?,
                    creator_scope: row.get(9)?,
                    created_at: row.get(10)?,
                };
                let member = ChannelMemberRow {
                    channel: row.get(11)?,
                    agent_name: row.get(12)?,
                    agent_scope: row.get(13)?,
                    invited_by: row.get(14)?,
                    source: row.get(15)?,
                    can_leave: row.get::<_, i64>(16)? != 0,
                    can_send: row.get::<_, i64>(17)? != 0,
                    can_invite: row.get::<_, i64>(18)? != 0,
                    can_manage: row.get::<_, i64>(19)? != 0,
                    is_from_default: row.get::<_, i64>(20)? != 0,
                    is_muted: row.get::<_, i64>(21)? != 0,
                    joined_at: row.get(22)?,
                };
                Ok((channel, member))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_member(row: &rusqlite::Row) -> rusqlite::Result<ChannelMemberRow> {
        Ok(ChannelMemberRow {
            channel: row.get(0)?,
            agent_name: row.get(1)?,
            agent_scope: row.get(2)?,
            invited_by: row.get(3)?,
            source: row.get(4)?,
            can_leave: row.get::<_, i64>(5)? != 0,
            can_send: row.get::<_, i64>(6)? != 0,
            can_invite: row.get::<_, i64>(7)? != 0,
            can_manage: row.get::<_, i64>(8)? != 0,
            is_from_default: row.get::<_, i64>(9)? != 0,
            is_muted: row.get::<_, i64>(10)? != 0,
            joined_at: row.get(11)?,
        })
    }

    // ---- messages -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        channel: &str,
        sender_name: &str,
        sender_scope: &str,
        content: &str,
        thread_handle: Option<&str>,
        metadata: &str,
        confidence: Option<f64>,
        intent_type: Option<&str>,
    ) -> Result<MessageRow> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages
             (channel, sender_name, sender_scope, content, created_at, thread_handle, metadata,
              is_edited, edited_at, confidence, intent_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?9)",
            params![channel, sender_name, sender_scope, content, now, thread_handle, metadata, confidence, intent_type],
        )?;
        let id = conn.last_insert_rowid();
        self.get_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, channel, sender_name, sender_scope, content, created_at, thread_handle,
                    metadata, is_edited, edited_at, confidence, intent_type
             FROM messages WHERE id = ?1",
            [id],
            Self::row_to_message,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn update_message_content(&self, id: i64, content: &str) -> Result<MessageRow> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE messages SET content = ?2, is_edited = 1, edited_at = ?3 WHERE id = ?1",
            params![id, content, now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn soft_delete_message(&self, id: i64, deleted_by: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = serde_json::json!({ "deleted": { "by": deleted_by, "at": now } }).to_string();
        let changed = conn.execute(
            "UPDATE messages SET content = ?4, metadata = ?3, is_edited = 1, edited_at = ?2
             WHERE id = ?1",
            params![id, now, metadata, DELETED_SENTINEL],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn list_messages(&self, channel: &str, limit: i64, before_id: Option<i64>) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, channel, sender_name, sender_scope, content, created_at, thread_handle,
                    metadata, is_edited, edited_at, confidence, intent_type
             FROM messages WHERE channel = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![channel, before_id, limit], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Lexical search: case-insensitive substring match over content, scoped
    /// to a set of channels the caller is already known to be a member of.
    pub fn search_lexical(&self, channels: &[String], query: &str, limit: i64) -> Result<Vec<MessageRow>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = channels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, channel, sender_name, sender_scope, content, created_at, thread_handle,
                    metadata, is_edited, edited_at, confidence, intent_type
             FROM messages
             WHERE channel IN ({placeholders}) AND LOWER(content) LIKE LOWER(?)
             ORDER BY id DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let needle = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut bound: Vec<&dyn rusqlite::ToSql> = channels.iter().map(|c| c as &dyn rusqlite::ToSql).collect();
        bound.push(&needle);
        bound.push(&limit);
        let rows = stmt
            .query_map(bound.as_slice(), Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            channel: row.get(1)?,
            sender_name: row.get(2)?,
            sender_scope: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
            thread_handle: row.get(6)?,
            metadata: row.get(7)?,
            is_edited: row.get::<_, i64>(8)? != 0,
            edited_at: row.get(9)?,
            confidence: row.get(10)?,
            intent_type: row.get(11)?,
        })
    }

    // ---- DM permissions -------------------------------------------------

    pub fn set_dm_permission(
        &self,
        owner_name: &str,
        owner_scope: &str,
        other_name: &str,
        other_scope: &str,
        permission: DmPermission,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO dm_permissions (owner_name, owner_scope, other_name, other_scope, permission, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner_name, owner_scope, other_name, other_scope)
             DO UPDATE SET permission = excluded.permission, reason = excluded.reason",
            params![owner_name, owner_scope, other_name, other_scope, permission.as_str(), reason],
        )?;
        Ok(())
    }

    pub fn get_dm_permission(&self, owner_name: &str, owner_scope: &str, other_name: &str, other_scope: &str) -> Result<Option<(DmPermission, String)>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT permission, reason FROM dm_permissions
             WHERE owner_name = ?1 AND owner_scope = ?2 AND other_name = ?3 AND other_scope = ?4",
            params![owner_name, owner_scope, other_name, other_scope],
            |row| {
                let perm: String = row.get(0)?;
                let reason: String = row.get(1)?;
                Ok((DmPermission::from_str_opt(&perm).unwrap_or(DmPermission::Allow), reason))
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn remove_dm_permission(&self, owner_name: &str, owner_scope: &str, other_name: &str, other_scope: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM dm_permissions WHERE owner_name = ?1 AND owner_scope = ?2 AND other_name = ?3 AND other_scope = ?4",
            params![owner_name, owner_scope, other_name, other_scope],
        )?;
        Ok(())
    }

    // ---- sessions --------------------------------------------------------

    pub fn register_session(&self, row: &SessionRow) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, project, project_path, project_name, transcript_path, scope, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                project = excluded.project, project_path = excluded.project_path,
                project_name = excluded.project_name, transcript_path = excluded.transcript_path,
                scope = excluded.scope, updated_at = excluded.updated_at, metadata = excluded.metadata",
            params![
                row.id, row.project, row.project_path, row.project_name, row.transcript_path,
                row.scope, row.updated_at, row.metadata
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, project, project_path, project_name, transcript_path, scope, updated_at, metadata
             FROM sessions WHERE id = ?1",
            [id],
            |row| {
                Ok(SessionRow {
                    id: row.get(0)?,
                    project: row.get(1)?,
                    project_path: row.get(2)?,
                    project_name: row.get(3)?,
                    transcript_path: row.get(4)?,
                    scope: row.get(5)?,
                    updated_at: row.get(6)?,
                    metadata: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn prune_sessions(&self, older_than_hours: i64) -> Result<u64> {
        let conn = self.conn()?;
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(older_than_hours);
        let changed = conn.execute(
            "DELETE FROM sessions WHERE updated_at < ?1",
            [cutoff.to_rfc3339()],
        )?;
        Ok(changed as u64)
    }

    // ---- tool call dedup --------------------------------------------------

    /// Record a tool-call digest for a session, deduping within a sliding
    /// window. Returns `Duplicate` without re-recording if the same digest
    /// was already seen for this session+tool inside the window.
    pub fn record_tool_call(&self, session: &str, tool_name: &str, digest: &str, window_minutes: i64) -> Result<DedupOutcome> {
        let conn = self.conn()?;
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(window_minutes);
        let existing: Option<String> = conn
            .query_row(
                "SELECT called_at FROM tool_calls WHERE session = ?1 AND tool_name = ?2 AND digest = ?3",
                params![session, tool_name, digest],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(called_at) = existing {
            if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&called_at) {
                if ts.with_timezone(&chrono::Utc) >= cutoff {
                    return Ok(DedupOutcome::Duplicate);
                }
            }
        }
        conn.execute(
            "INSERT INTO tool_calls (session, tool_name, digest, called_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session, tool_name, digest) DO UPDATE SET called_at = excluded.called_at",
            params![session, tool_name, digest, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(DedupOutcome::Recorded)
    }

    pub fn prune_tool_calls(&self, older_than_minutes: i64) -> Result<u64> {
        let conn = self.conn()?;
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(older_than_minutes);
        let changed = conn.execute("DELETE FROM tool_calls WHERE called_at < ?1", [cutoff.to_rfc3339()])?;
        Ok(changed as u64)
    }

    // ---- vector index (optional semantic backend) -------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_embedding(
        &self,
        message_id: i64,
        channel: &str,
        sender_name: &str,
        sender_scope: &str,
        created_at: &str,
        intent_type: Option<&str>,
        confidence: Option<f64>,
        embedding: &[f32],
    ) -> Result<()> {
        let conn = self.conn()?;
        let bytes = f32_slice_to_bytes(embedding);
        conn.execute(
            "INSERT INTO vector_index
             (message_id, channel, sender_name, sender_scope, created_at, intent_type, confidence, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(message_id) DO UPDATE SET embedding = excluded.embedding",
            params![message_id, channel, sender_name, sender_scope, created_at, intent_type, confidence, bytes],
        )?;
        Ok(())
    }

    pub fn list_embeddings_in_channels(&self, channels: &[String]) -> Result<Vec<EmbeddingRow>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = channels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT message_id, channel, sender_name, sender_scope, created_at, intent_type, confidence, embedding
             FROM vector_index WHERE channel IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn rusqlite::ToSql> = channels.iter().map(|c| c as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(bound.as_slice(), |row| {
                let bytes: Vec<u8> = row.get(7)?;
                Ok(EmbeddingRow {
                    message_id: row.get(0)?,
                    channel: row.get(1)?,
                    sender_name: row.get(2)?,
                    sender_scope: row.get(3)?,
                    created_at: row.get(4)?,
                    intent_type: row.get(5)?,
                    confidence: row.get(6)?,
                    embedding: bytes_to_f32_vec(&bytes),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn f32_slice_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_fetch_project() {
        let store = Store::open_in_memory().unwrap();
        let row = store.register_project("abc123", "/home/alice/repo", "repo").unwrap();
        assert_eq!(row.id, "abc123");
        let fetched = store.get_project("abc123").unwrap().unwrap();
        assert_eq!(fetched.path, "/home/alice/repo");
    }

    #[test]
    fn create_channel_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let c1 = store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        let c2 = store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        assert_eq!(c1.handle, c2.handle);
    }

    #[test]
    fn add_member_then_remove() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        store
            .add_member("global:general", "alice", "global", "alice", "direct", true, true, false, false, false)
            .unwrap();
        assert!(store.get_member("global:general", "alice", "global").unwrap().is_some());
        store.remove_member("global:general", "alice", "global").unwrap();
        assert!(store.get_member("global:general", "alice", "global").unwrap().is_none());
    }

    #[test]
    fn message_insert_edit_soft_delete() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        let msg = store
            .insert_message("global:general", "alice", "global", "hello", None, "{}", None, None)
            .unwrap();
        assert!(!msg.is_edited);
        let edited = store.update_message_content(msg.id, "hello world").unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "hello world");
        store.soft_delete_message(msg.id, "alice").unwrap();
        let deleted = store.get_message(msg.id).unwrap().unwrap();
        assert_eq!(deleted.content, DELETED_SENTINEL);
    }

    #[test]
    fn lexical_search_matches_case_insensitively() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        store
            .insert_message("global:general", "alice", "global", "The Deploy Went Fine", None, "{}", None, None)
            .unwrap();
        let hits = store
            .search_lexical(&["global:general".to_string()], "deploy", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn tool_call_dedup_within_window() {
        let store = Store::open_in_memory().unwrap();
        let first = store.record_tool_call("sess1", "send_message", "digest1", 10).unwrap();
        let second = store.record_tool_call("sess1", "send_message", "digest1", 10).unwrap();
        assert_eq!(first, DedupOutcome::Recorded);
        assert_eq!(second, DedupOutcome::Duplicate);
    }

    #[test]
    fn dm_permission_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_dm_permission("alice", "global", "bob", "global", DmPermission::Block, "spam")
            .unwrap();
        let (perm, reason) = store
            .get_dm_permission("alice", "global", "bob", "global")
            .unwrap()
            .unwrap();
        assert_eq!(perm, DmPermission::Block);
        assert_eq!(reason, "spam");
        store.remove_dm_permission("alice", "global", "bob", "global").unwrap();
        assert!(store.get_dm_permission("alice", "global", "bob", "global").unwrap().is_none());
    }

    #[test]
    fn project_link_direction_flips_on_reverse_lookup() {
        let store = Store::open_in_memory().unwrap();
        store.add_project_link("proj-a", "proj-b", LinkType::AToB).unwrap();
        assert_eq!(store.find_project_link("proj-a", "proj-b").unwrap(), Some(LinkType::AToB));
        assert_eq!(store.find_project_link("proj-b", "proj-a").unwrap(), Some(LinkType::BToA));
        assert_eq!(store.find_project_link("proj-x", "proj-y").unwrap(), None);
    }

    #[test]
    fn embedding_roundtrips_through_blob_encoding() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        let msg = store
            .insert_message("global:general", "alice", "global", "hi", None, "{}", None, None)
            .unwrap();
        store
            .upsert_embedding(msg.id, "global:general", "alice", "global", &msg.created_at, None, None, &[0.1, 0.2, 0.3])
            .unwrap();
        let rows = store.list_embeddings_in_channels(&["global:general".to_string()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].embedding[1] - 0.2).abs() < 1e-6);
    }
}
