//! Derived read-only projections over the Store (spec §4.2). Each view is a
//! pure function of Store state — safe to compute on demand or cache, as
//! long as a cache is invalidated on the writes that would change its
//! answer.

use crate::errors::DmDenialReason;
use crate::ids::Scope;
use crate::store::{ChannelMemberRow, ChannelRow, DmPermission, Store};

#[derive(Debug, Clone)]
pub struct AgentChannelView {
    pub channel: ChannelRow,
    pub membership: ChannelMemberRow,
}

/// Every channel the agent is a member of. Non-members see nothing here —
/// `list_available_channels` in the channel engine covers joinable channels.
pub fn agent_channels(store: &Store, agent_name: &str, agent_scope: &Scope) -> Result<Vec<AgentChannelView>, crate::errors::StoreError> {
    let pairs = store.list_memberships_for_agent(agent_name, agent_scope.as_handle_segment())?;
    Ok(pairs
        .into_iter()
        .map(|(channel, membership)| AgentChannelView { channel, membership })
        .collect())
}

fn scopes_linked(store: &Store, a: &str, b: &str) -> Result<bool, crate::errors::StoreError> {
    if a == b {
        return Ok(true);
    }
    Ok(store.find_project_link(a, b)?.is_some())
}

/// `true` iff the two scopes are the same, or linked in either direction, or
/// either side is `global`. Project-link composition is never chased
/// transitively: this only ever checks one hop.
pub fn scopes_reachable(store: &Store, a: &Scope, b: &Scope) -> Result<bool, crate::errors::StoreError> {
    if matches!(a, Scope::Global) || matches!(b, Scope::Global) {
        return Ok(true);
    }
    scopes_linked(store, a.as_handle_segment(), b.as_handle_segment())
}

/// `dm_access(a, b)`: symmetric by construction — it only ever consults the
/// receiver-side policy and allow/block rows for the direction being probed,
/// but callers should probe a DM by checking both directions.
pub fn dm_access_reason(
    store: &Store,
    sender_name: &str,
    sender_scope: &Scope,
    receiver_name: &str,
    receiver_scope: &Scope,
) -> Result<Option<DmDenialReason>, crate::errors::StoreError> {
    if sender_name == receiver_name && sender_scope == receiver_scope {
        return Ok(Some(DmDenialReason::SelfDm));
    }

    let sender_seg = sender_scope.as_handle_segment();
    let receiver_seg = receiver_scope.as_handle_segment();

    let blocked_by_receiver = store
        .get_dm_permission(receiver_name, receiver_seg, sender_name, sender_seg)?
        .is_some_and(|(perm, _)| perm == DmPermission::Block);
    let blocked_by_sender = store
        .get_dm_permission(sender_name, sender_seg, receiver_name, receiver_seg)?
        .is_some_and(|(perm, _)| perm == DmPermission::Block);
    if blocked_by_receiver || blocked_by_sender {
        return Ok(Some(DmDenialReason::Blocked));
    }

    let Some(receiver) = store.get_agent(receiver_name, receiver_seg)? else {
        return Ok(Some(DmDenialReason::Closed));
    };
    match receiver.dm_policy.as_str() {
        "open" => Ok(None),
        "restricted" => {
            let allowed = store
                .get_dm_permission(receiver_name, receiver_seg, sender_name, sender_seg)?
                .is_some_and(|(perm, _)| perm == DmPermission::Allow);
            if allowed {
                Ok(None)
            } else {
                Ok(Some(DmDenialReason::RequiresPermission))
            }
        }
        _ => Ok(Some(DmDenialReason::Closed)),
    }
}

pub fn dm_access(
    store: &Store,
    a_name: &str,
    a_scope: &Scope,
    b_name: &str,
    b_scope: &Scope,
) -> Result<bool, crate::errors::StoreError> {
    Ok(dm_access_reason(store, a_name, a_scope, b_name, b_scope)?.is_none()
        && dm_access_reason(store, b_name, b_scope, a_name, a_scope)?.is_none())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmAvailability {
    Available,
    RequiresPermission,
    Blocked,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct DiscoveryEntry {
    pub name: String,
    pub scope: Scope,
    pub dm_availability: DmAvailability,
    pub has_existing_dm: bool,
}

/// `agent_discovery(viewer)`: every non-private agent visible to `viewer`,
/// ordered existing-DM-partners first, then by availability tier, then name.
/// Private agents never appear for anyone but themselves — tested directly
/// against the anti-reflexive-privacy invariant.
pub fn agent_discovery(store: &Store, viewer_name: &str, viewer_scope: &Scope) -> Result<Vec<DiscoveryEntry>, crate::errors::StoreError> {
    let mut entries = Vec::new();
    let viewer_seg = viewer_scope.as_handle_segment();

    let mut candidate_scopes = vec![viewer_seg.to_string()];
    for link in store.list_project_links()? {
        if link.source == viewer_seg {
            candidate_scopes.push(link.target);
        } else if link.target == viewer_seg {
            candidate_scopes.push(link.source);
        }
    }
    candidate_scopes.push(crate::ids::GLOBAL_SCOPE.to_string());
    candidate_scopes.dedup();

    let mut seen = std::collections::HashSet::new();
    for scope_seg in &candidate_scopes {
        for agent in store.list_agents_in_scope(scope_seg)? {
            if !seen.insert((agent.name.clone(), agent.scope.clone())) {
                continue;
            }
            let is_self = agent.name == viewer_name && agent.scope == viewer_seg;
            let visible = match agent.discoverability.as_str() {
                "public" => true,
                "project" => {
                    is_self
                        || agent.scope == viewer_seg
                        || store.find_project_link(&agent.scope, viewer_seg)?.is_some()
                        || matches!(viewer_scope, Scope::Global)
                }
                "private" => is_self,
                _ => false,
            };
            if !visible {
                continue;
            }
            let agent_scope = Scope::from_segment(&agent.scope);
            let availability = if is_self {
                DmAvailability::Unavailable
            } else {
                match dm_access_reason(store, viewer_name, viewer_scope, &agent.name, &agent_scope)? {
                    None => DmAvailability::Available,
                    Some(DmDenialReason::RequiresPermission) => DmAvailability::RequiresPermission,
                    Some(DmDenialReason::Blocked) => DmAvailability::Blocked,
                    Some(_) => DmAvailability::Unavailable,
                }
            };
            let handle = crate::ids::ChannelHandle::direct(
                viewer_name.to_string(),
                viewer_scope.clone(),
                agent.name.clone(),
                agent_scope.clone(),
            )
            .to_string();
            let has_existing_dm = store.get_channel(&handle)?.is_some();
            entries.push(DiscoveryEntry {
                name: agent.name,
                scope: agent_scope,
                dm_availability: availability,
                has_existing_dm,
            });
        }
    }

    entries.sort_by(|a, b| {
        let dm_rank = |e: &DiscoveryEntry| if e.has_existing_dm { 0 } else { 1 };
        let tier_rank = |e: &DiscoveryEntry| match e.dm_availability {
            DmAvailability::Available => 0,
            DmAvailability::RequiresPermission => 1,
            DmAvailability::Blocked => 2,
            DmAvailability::Unavailable => 3,
        };
        dm_rank(a)
            .cmp(&dm_rank(b))
            .then(tier_rank(a).cmp(&tier_rank(b)))
            .then(a.name.cmp(&b.name))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccessType, Store};

    fn seed_agent(store: &Store, name: &str, scope: &str) {
        store.upsert_agent(name, scope, "").unwrap();
    }

    #[test]
    fn dm_access_is_symmetric_absent_blocks() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "ian", "global");
        seed_agent(&store, "helen", "global");
        assert!(dm_access(&store, "ian", &Scope::Global, "helen", &Scope::Global).unwrap());
        assert!(dm_access(&store, "helen", &Scope::Global, "ian", &Scope::Global).unwrap());
    }

    #[test]
    fn block_dominates_allow() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "frank", "global");
        seed_agent(&store, "grace", "global");
        store
            .set_dm_permission("frank", "global", "grace", "global", DmPermission::Block, "")
            .unwrap();
        store
            .set_dm_permission("grace", "global", "frank", "global", DmPermission::Allow, "")
            .unwrap();
        assert!(!dm_access(&store, "frank", &Scope::Global, "grace", &Scope::Global).unwrap());
        assert!(!dm_access(&store, "grace", &Scope::Global, "frank", &Scope::Global).unwrap());
    }

    #[test]
    fn restricted_policy_requires_allow() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "ian", "global");
        seed_agent(&store, "helen", "global");
        store.set_agent_dm_policy("helen", "global", "restricted").unwrap();
        assert!(!dm_access(&store, "ian", &Scope::Global, "helen", &Scope::Global).unwrap());
        store
            .set_dm_permission("helen", "global", "ian", "global", DmPermission::Allow, "")
            .unwrap();
        assert!(dm_access(&store, "ian", &Scope::Global, "helen", &Scope::Global).unwrap());
    }

    #[test]
    fn private_agent_never_discoverable_by_others() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "viewer", "global");
        seed_agent(&store, "ghost", "global");
        store.set_agent_discoverability("ghost", "global", "private").unwrap();
        let found = agent_discovery(&store, "viewer", &Scope::Global).unwrap();
        assert!(!found.iter().any(|e| e.name == "ghost"));
    }

    #[test]
    fn agent_channels_only_lists_memberships() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        store
            .add_member("global:general", "alice", "global", "alice", "direct", true, true, false, false, false)
            .unwrap();
        let views = agent_channels(&store, "alice", &Scope::Global).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].channel.handle, "global:general");
    }
}
