//! Channel Engine (spec §4.3): channel lifecycle and membership operations.

use crate::errors::{CoreError, CoreResult};
use crate::ids::{is_valid_channel_name, ChannelHandle, Scope};
use crate::store::{AccessType, ChannelMemberRow, ChannelRow, Store};
use crate::views;

#[derive(Debug, Clone)]
pub struct AvailableChannel {
    pub channel: ChannelRow,
    pub is_member: bool,
    pub can_join: bool,
    pub access_reason: String,
}

pub struct ChannelEngine {
    store: Store,
}

impl ChannelEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create_channel(
        &self,
        name: &str,
        scope: &Scope,
        access_type: AccessType,
        creator: Option<(&str, &Scope)>,
        is_default: bool,
        description: &str,
    ) -> CoreResult<ChannelRow> {
        if !is_valid_channel_name(name) {
            return Err(CoreError::InvalidInput(format!("invalid channel name: {name}")));
        }
        let handle = match scope {
            Scope::Global => ChannelHandle::global(name),
            Scope::Project(id) => ChannelHandle::project(id.clone(), name),
        };
        let (creator_name, creator_scope) = match creator {
            Some((n, s)) => (Some(n), Some(s.as_handle_segment())),
            None => (None, None),
        };
        let row = self.store.create_channel(
            &handle.to_string(),
            "channel",
            access_type,
            scope.as_handle_segment(),
            name,
            description,
            is_default,
            creator_name,
            creator_scope,
        )?;

        if let Some((creator_name, creator_scope)) = creator {
            if matches!(access_type, AccessType::Members | AccessType::Private) {
                self.store.add_member(
                    &row.handle,
                    creator_name,
                    creator_scope.as_handle_segment(),
                    creator_name,
                    "manual",
                    true,
                    true,
                    matches!(access_type, AccessType::Members),
                    true,
                    false,
                )?;
            }
        }
        Ok(row)
    }

    pub fn join_channel(&self, agent_name: &str, agent_scope: &Scope, handle: &str) -> CoreResult<ChannelMemberRow> {
        let channel = self
            .store
            .get_channel(handle)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {handle}")))?;
        if channel.archived {
            return Err(CoreError::InvalidInput(format!("channel {handle} is archived")));
        }
        if let Some(existing) = self.store.get_member(handle, agent_name, agent_scope.as_handle_segment())? {
            return Ok(existing);
        }
        if channel.access_type != AccessType::Open.as_str() {
            return Err(CoreError::PermissionDenied(format!("channel {handle} is not open")));
        }
        let eligible = channel.scope == crate::ids::GLOBAL_SCOPE
            || matches!(agent_scope, Scope::Global)
            || views::scopes_reachable(&self.store, agent_scope, &Scope::from_segment(&channel.scope))?;
        if !eligible {
            return Err(CoreError::ScopeDenied(format!(
                "agent scope not eligible to self-join {handle}"
            )));
        }
        let row = self.store.add_member(
            handle,
            agent_name,
            agent_scope.as_handle_segment(),
            "self",
            "manual",
            true,
            true,
            true,
            false,
            false,
        )?;
        Ok(row)
    }

    pub fn invite_to_channel(
        &self,
        handle: &str,
        invitee_name: &str,
        invitee_scope: &Scope,
        inviter_name: &str,
        inviter_scope: &Scope,
    ) -> CoreResult<ChannelMemberRow> {
        let channel = self
            .store
            .get_channel(handle)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {handle}")))?;
        if channel.access_type != AccessType::Members.as_str() {
            return Err(CoreError::PermissionDenied(format!(
                "channel {handle} does not accept invitations"
            )));
        }
        let inviter = self
            .store
            .get_member(handle, inviter_name, inviter_scope.as_handle_segment())?
            .ok_or_else(|| CoreError::NotFound(format!("{inviter_name} is not a member of {handle}")))?;
        if !inviter.can_invite {
            return Err(CoreError::PermissionDenied(format!(
                "{inviter_name} cannot invite to {handle}"
            )));
        }
        if let Some(existing) = self
            .store
            .get_member(handle, invitee_name, invitee_scope.as_handle_segment())?
        {
            return Ok(existing);
        }
        let row = self.store.add_member(
            handle,
            invitee_name,
            invitee_scope.as_handle_segment(),
            inviter_name,
            "manual",
            true,
            true,
            false,
            false,
            false,
        )?;
        Ok(row)
    }

    pub fn leave_channel(&self, agent_name: &str, agent_scope: &Scope, handle: &str) -> CoreResult<()> {
        let member = self
            .store
            .get_member(handle, agent_name, agent_scope.as_handle_segment())?
            .ok_or_else(|| CoreError::NotFound(format!("{agent_name} is not a member of {handle}")))?;
        if !member.can_leave {
            return Err(CoreError::PermissionDenied(format!(
                "{agent_name} cannot leave {handle}"
            )));
        }
        self.store.remove_member(handle, agent_name, agent_scope.as_handle_segment())?;
        Ok(())
    }

    /// Archive a channel. Only a member with `can_manage=true` may archive;
    /// membership itself is left untouched (archiving hides the channel from
    /// joins and listings, it doesn't dissolve it).
    pub fn archive_channel(&self, agent_name: &str, agent_scope: &Scope, handle: &str) -> CoreResult<()> {
        let channel = self
            .store
            .get_channel(handle)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {handle}")))?;
        if channel.archived {
            return Ok(());
        }
        let member = self
            .store
            .get_member(handle, agent_name, agent_scope.as_handle_segment())?
            .ok_or_else(|| CoreError::NotFound(format!("{agent_name} is not a member of {handle}")))?;
        if !member.can_manage {
            return Err(CoreError::PermissionDenied(format!(
                "{agent_name} cannot archive {handle}"
            )));
        }
        self.store.archive_channel(handle)?;
        Ok(())
    }

    /// For a newly-registered agent in `agent_scope`, join every non-archived
    /// channel with `is_default` set that's visible to it (global, plus its
    /// own project when scoped to one), skipping names in `exclude`. Mirrors
    /// the candidate gathering in `list_available_channels`, minus linked
    /// projects — defaults only come from the agent's own global/project
    /// scope. Returns the channels joined; each is applied independently so
    /// one failure doesn't block the rest.
    pub fn apply_defaults(&self, agent_name: &str, agent_scope: &Scope, exclude: &[String]) -> CoreResult<Vec<ChannelRow>> {
        let mut candidates = self.store.list_channels_in_scope(crate::ids::GLOBAL_SCOPE, false)?;
        if let Scope::Project(id) = agent_scope {
            candidates.extend(self.store.list_channels_in_scope(id, false)?);
        }
        let mut joined = Vec::new();
        for channel in candidates {
            if !channel.is_default || exclude.contains(&channel.name) {
                continue;
            }
            if self
                .store
                .get_member(&channel.handle, agent_name, agent_scope.as_handle_segment())?
                .is_some()
            {
                joined.push(channel);
                continue;
            }
            let invited_by = if channel.access_type == AccessType::Open.as_str() {
                "self"
            } else {
                "system"
            };
            self.store.add_member(
                &channel.handle,
                agent_name,
                agent_scope.as_handle_segment(),
                invited_by,
                "default",
                true,
                true,
                channel.access_type == AccessType::Open.as_str(),
                false,
                true,
            )?;
            joined.push(channel);
        }
        Ok(joined)
    }

    pub fn list_available_channels(&self, agent_name: &str, agent_scope: &Scope) -> CoreResult<Vec<AvailableChannel>> {
        let mut candidates: Vec<ChannelRow> = self.store.list_channels_in_scope(crate::ids::GLOBAL_SCOPE, false)?;
        if let Scope::Project(id) = agent_scope {
            candidates.extend(self.store.list_channels_in_scope(id, false)?);
        }
        for link in self.store.list_project_links()? {
            let other = if link.source == agent_scope.as_handle_segment() {
                Some(link.target)
            } else if link.target == agent_scope.as_handle_segment() {
                Some(link.source)
            } else {
                None
            };
            if let Some(scope) = other {
                candidates.extend(self.store.list_channels_in_scope(&scope, false)?);
            }
        }
        candidates.sort_by(|a, b| a.handle.cmp(&b.handle));
        candidates.dedup_by(|a, b| a.handle == b.handle);

        let mut out = Vec::with_capacity(candidates.len());
        for channel in candidates {
            if channel.access_type == AccessType::Private.as_str() {
                continue;
            }
            let member = self
                .store
                .get_member(&channel.handle, agent_name, agent_scope.as_handle_segment())?;
            let is_member = member.is_some();
            let can_join = !is_member && channel.access_type == AccessType::Open.as_str();
            let access_reason = if is_member {
                "member".to_string()
            } else if channel.scope == crate::ids::GLOBAL_SCOPE {
                "global".to_string()
            } else if channel.scope == agent_scope.as_handle_segment() {
                "same_project".to_string()
            } else {
                "linked_project".to_string()
            };
            out.push(AvailableChannel {
                channel,
                is_member,
                can_join,
                access_reason,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccessType;

    fn engine() -> ChannelEngine {
        ChannelEngine::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn create_channel_rejects_bad_name() {
        let engine = engine();
        let err = engine
            .create_channel("Bad Name", &Scope::Global, AccessType::Open, None, false, "")
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidInput);
    }

    #[test]
    fn members_channel_auto_adds_creator_with_manage() {
        let engine = engine();
        let row = engine
            .create_channel(
                "private-team",
                &Scope::Global,
                AccessType::Members,
                Some(("alice", &Scope::Global)),
                false,
                "",
            )
            .unwrap();
        let member = engine.store.get_member(&row.handle, "alice", "global").unwrap().unwrap();
        assert!(member.can_manage);
        assert!(member.can_invite);
    }

    #[test]
    fn join_open_channel_is_idempotent() {
        let engine = engine();
        let row = engine
            .create_channel("general", &Scope::Global, AccessType::Open, None, false, "")
            .unwrap();
        let m1 = engine.join_channel("alice", &Scope::Global, &row.handle).unwrap();
        let m2 = engine.join_channel("alice", &Scope::Global, &row.handle).unwrap();
        assert_eq!(m1, m2);
    }

    #[test]
    fn cross_project_self_join_denied_without_link() {
        let engine = engine();
        let p2 = Scope::Project("proj_bbbb".to_string());
        let row = engine
            .create_channel("dev", &p2, AccessType::Open, None, false, "")
            .unwrap();
        let p1 = Scope::Project("proj_aaaa".to_string());
        let err = engine.join_channel("alice", &p1, &row.handle).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ScopeDenied);
    }

    #[test]
    fn invite_crosses_projects_when_channel_accepts_invites() {
        let engine = engine();
        let p1 = Scope::Project("proj_aaaa".to_string());
        let row = engine
            .create_channel("private", &p1, AccessType::Members, Some(("alice", &p1)), false, "")
            .unwrap();
        let p2 = Scope::Project("proj_bbbb".to_string());
        let member = engine
            .invite_to_channel(&row.handle, "bob", &p2, "alice", &p1)
            .unwrap();
        assert_eq!(member.agent_name, "bob");
    }

    #[test]
    fn apply_defaults_joins_global_and_project_defaults_only() {
        let engine = engine();
        engine
            .create_channel("announcements", &Scope::Global, AccessType::Open, None, true, "")
            .unwrap();
        engine
            .create_channel("random", &Scope::Global, AccessType::Open, None, false, "")
            .unwrap();
        let p1 = Scope::Project("proj_aaaa".to_string());
        engine.create_channel("dev", &p1, AccessType::Open, None, true, "").unwrap();
        let p2 = Scope::Project("proj_bbbb".to_string());
        engine.create_channel("dev", &p2, AccessType::Open, None, true, "").unwrap();

        let joined = engine.apply_defaults("alice", &p1, &[]).unwrap();
        let handles: Vec<&str> = joined.iter().map(|c| c.handle.as_str()).collect();
        assert!(handles.contains(&"global:announcements"));
        assert!(handles.contains(&"proj_aaaa:dev"));
        assert!(!handles.iter().any(|h| h.contains("random")));
        assert!(!handles.iter().any(|h| h.contains("proj_bbbb")));
        assert!(engine.store.get_member("global:announcements", "alice", "proj_aaaa").unwrap().is_some());
    }

    #[test]
    fn apply_defaults_respects_exclude_list() {
        let engine = engine();
        engine
            .create_channel("announcements", &Scope::Global, AccessType::Open, None, true, "")
            .unwrap();
        let joined = engine
            .apply_defaults("alice", &Scope::Global, &["announcements".to_string()])
            .unwrap();
        assert!(joined.is_empty());
    }

    #[test]
    fn apply_defaults_is_idempotent() {
        let engine = engine();
        engine
            .create_channel("announcements", &Scope::Global, AccessType::Open, None, true, "")
            .unwrap();
        engine.apply_defaults("alice", &Scope::Global, &[]).unwrap();
        let joined = engine.apply_defaults("alice", &Scope::Global, &[]).unwrap();
        assert_eq!(joined.len(), 1);
    }

    #[test]
    fn archive_channel_requires_can_manage() {
        let engine = engine();
        let row = engine
            .create_channel("private-team", &Scope::Global, AccessType::Members, Some(("alice", &Scope::Global)), false, "")
            .unwrap();
        engine.join_channel("bob", &Scope::Global, &row.handle).unwrap_err();
        engine
            .invite_to_channel(&row.handle, "bob", &Scope::Global, "alice", &Scope::Global)
            .unwrap();
        let err = engine.archive_channel("bob", &Scope::Global, &row.handle).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::PermissionDenied);
        engine.archive_channel("alice", &Scope::Global, &row.handle).unwrap();
        assert!(engine.store.get_channel(&row.handle).unwrap().unwrap().archived);
    }

    #[test]
    fn archive_channel_is_idempotent() {
        let engine = engine();
        let row = engine
            .create_channel("private-team", &Scope::Global, AccessType::Members, Some(("alice", &Scope::Global)), false, "")
            .unwrap();
        engine.archive_channel("alice", &Scope::Global, &row.handle).unwrap();
        engine.archive_channel("alice", &Scope::Global, &row.handle).unwrap();
    }

    #[test]
    fn leave_respects_can_leave_flag() {
        let engine = engine();
        let row = engine
            .create_channel("general", &Scope::Global, AccessType::Open, None, false, "")
            .unwrap();
        engine.join_channel("alice", &Scope::Global, &row.handle).unwrap();
        engine.leave_channel("alice", &Scope::Global, &row.handle).unwrap();
        assert!(engine.store.get_member(&row.handle, "alice", "global").unwrap().is_none());
    }
}
