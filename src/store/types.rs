//! Row types returned from the store. Plain data, no behavior.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub id: String,
    pub path: String,
    pub display_name: String,
    pub created_at: String,
    pub last_active: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRow {
    pub name: String,
    pub scope: String,
    pub description: String,
    pub status: String,
    pub dm_policy: String,
    pub discoverability: String,
    pub metadata: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Bidirectional,
    AToB,
    BToA,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Bidirectional => "bidirectional",
            LinkType::AToB => "a_to_b",
            LinkType::BToA => "b_to_a",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "bidirectional" => Some(LinkType::Bidirectional),
            "a_to_b" => Some(LinkType::AToB),
            "b_to_a" => Some(LinkType::BToA),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLinkRow {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Open,
    Members,
    Private,
}

impl AccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::Open => "open",
            AccessType::Members => "members",
            AccessType::Private => "private",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "open" => Some(AccessType::Open),
            "members" => Some(AccessType::Members),
            "private" => Some(AccessType::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub handle: String,
    pub channel_type: String,
    pub access_type: String,
    pub scope: String,
    pub name: String,
    pub description: String,
    pub is_default: bool,
    pub archived: bool,
    pub creator_name: Option<String>,
    pub creator_scope: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMemberRow {
    pub channel: String,
    pub agent_name: String,
    pub agent_scope: String,
    pub invited_by: String,
    pub source: String,
    pub can_leave: bool,
    pub can_send: bool,
    pub can_invite: bool,
    pub can_manage: bool,
    pub is_from_default: bool,
    pub is_muted: bool,
    pub joined_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub channel: String,
    pub sender_name: String,
    pub sender_scope: String,
    pub content: String,
    pub created_at: String,
    pub thread_handle: Option<String>,
    pub metadata: String,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub confidence: Option<f64>,
    pub intent_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmPermission {
    Allow,
    Block,
}

impl DmPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            DmPermission::Allow => "allow",
            DmPermission::Block => "block",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(DmPermission::Allow),
            "block" => Some(DmPermission::Block),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub project: Option<String>,
    pub project_path: Option<String>,
    pub project_name: Option<String>,
    pub transcript_path: Option<String>,
    pub scope: String,
    pub updated_at: String,
    pub metadata: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Recorded,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRow {
    pub message_id: i64,
    pub channel: String,
    pub sender_name: String,
    pub sender_scope: String,
    pub created_at: String,
    pub intent_type: Option<String>,
    pub confidence: Option<f64>,
    pub embedding: Vec<f32>,
}
