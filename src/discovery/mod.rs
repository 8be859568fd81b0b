//! Discovery & DM Engine (spec §4.5): can-DM evaluation, deterministic DM
//! channel creation, allow/block management, and agent discovery listing.

use crate::errors::{CoreError, CoreResult, DmDenialReason};
use crate::ids::{ChannelHandle, Scope};
use crate::store::{AccessType, ChannelRow, DmPermission, Store};
use crate::views::{self, DiscoveryEntry};

pub struct DiscoveryEngine {
    store: Store,
}

impl DiscoveryEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn can_dm(&self, a_name: &str, a_scope: &Scope, b_name: &str, b_scope: &Scope) -> CoreResult<Option<DmDenialReason>> {
        if let Some(reason) = views::dm_access_reason(&self.store, a_name, a_scope, b_name, b_scope)? {
            return Ok(Some(reason));
        }
        Ok(views::dm_access_reason(&self.store, b_name, b_scope, a_name, a_scope)?)
    }

    /// Create (or return the existing) canonical DM channel between two
    /// agents. Idempotent regardless of argument order.
    pub fn create_or_get_dm(&self, a_name: &str, a_scope: &Scope, b_name: &str, b_scope: &Scope) -> CoreResult<ChannelRow> {
        if let Some(reason) = self.can_dm(a_name, a_scope, b_name, b_scope)? {
            return Err(CoreError::DmNotAllowed { reason });
        }
        let handle = ChannelHandle::direct(a_name.to_string(), a_scope.clone(), b_name.to_string(), b_scope.clone());
        let handle_str = handle.to_string();
        if let Some(existing) = self.store.get_channel(&handle_str)? {
            return Ok(existing);
        }
        let (first, second) = match &handle {
            ChannelHandle::Direct { a, b } => (a.clone(), b.clone()),
            _ => unreachable!("ChannelHandle::direct always builds a Direct variant"),
        };
        let row = self.store.create_channel(
            &handle_str,
            "direct",
            AccessType::Private,
            // DM channels have no single owning scope; store them under the
            // lexicographically-first participant's scope for bookkeeping.
            first.1.as_handle_segment(),
            &handle_str,
            "",
            false,
            Some(&first.0),
            Some(first.1.as_handle_segment()),
        )?;
        for (name, scope) in [first, second] {
            self.store.add_member(
                &row.handle,
                &name,
                scope.as_handle_segment(),
                "system",
                "system",
                false,
                true,
                false,
                false,
                false,
            )?;
        }
        Ok(row)
    }

    pub fn set_dm_permission(
        &self,
        owner_name: &str,
        owner_scope: &Scope,
        other_name: &str,
        other_scope: &Scope,
        permission: DmPermission,
        reason: &str,
    ) -> CoreResult<()> {
        self.store.set_dm_permission(
            owner_name,
            owner_scope.as_handle_segment(),
            other_name,
            other_scope.as_handle_segment(),
            permission,
            reason,
        )?;
        Ok(())
    }

    pub fn remove_dm_permission(&self, owner_name: &str, owner_scope: &Scope, other_name: &str, other_scope: &Scope) -> CoreResult<()> {
        self.store.remove_dm_permission(
            owner_name,
            owner_scope.as_handle_segment(),
            other_name,
            other_scope.as_handle_segment(),
        )?;
        Ok(())
    }

    pub fn set_dm_policy(&self, agent_name: &str, agent_scope: &Scope, policy: &str) -> CoreResult<()> {
        if !matches!(policy, "open" | "restricted" | "closed") {
            return Err(CoreError::InvalidInput(format!("unknown dm policy: {policy}")));
        }
        self.store.set_agent_dm_policy(agent_name, agent_scope.as_handle_segment(), policy)?;
        Ok(())
    }

    pub fn list_discoverable(&self, viewer_name: &str, viewer_scope: &Scope, filter_by_dm: bool) -> CoreResult<Vec<DiscoveryEntry>> {
        let mut entries = views::agent_discovery(&self.store, viewer_name, viewer_scope)?;
        if filter_by_dm {
            entries.retain(|e| {
                matches!(
                    e.dm_availability,
                    views::DmAvailability::Available | views::DmAvailability::RequiresPermission
                )
            });
        }
        Ok(entries)
    }
}
