//! Message Engine (spec §4.4): send, edit, soft-delete, get, and the
//! `@mention` validation pipeline. Search lives in [`crate::search`], which
//! sits on top of this engine's storage.

use serde_json::json;

use crate::errors::{CoreError, CoreResult};
use crate::ids::{extract_mention_tokens, Scope};
use crate::store::{MessageRow, Store};
use crate::views;

pub use crate::store::DELETED_SENTINEL;

pub struct MessageEngine {
    store: Store,
}

impl MessageEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validate raw `@name[:project]` tokens against channel membership.
    /// Invalid tokens (not a member, or no such agent) are dropped, never
    /// fail the send — the caller may still want them for logging.
    fn validate_mentions(&self, channel: &str, content: &str) -> CoreResult<(Vec<String>, Vec<String>)> {
        let tokens = extract_mention_tokens(content);
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for (name, scope_hint) in tokens {
            let candidates: Vec<Scope> = match scope_hint {
                Some(project) => vec![Scope::Project(project)],
                None => {
                    let members = self.store.list_members(channel)?;
                    members
                        .into_iter()
                        .filter(|m| m.agent_name == name)
                        .map(|m| Scope::from_segment(&m.agent_scope))
                        .collect()
                }
            };
            let is_member = candidates
                .iter()
                .any(|scope| {
                    self.store
                        .get_member(channel, &name, scope.as_handle_segment())
                        .ok()
                        .flatten()
                        .is_some()
                });
            if is_member {
                valid.push(name);
            } else {
                invalid.push(name);
            }
        }
        Ok((valid, invalid))
    }

    pub fn send(
        &self,
        channel: &str,
        sender_name: &str,
        sender_scope: &Scope,
        content: &str,
        thread: Option<&str>,
        confidence: Option<f64>,
        intent_type: Option<&str>,
    ) -> CoreResult<MessageRow> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidInput("message content must not be blank".to_string()));
        }
        let member = self
            .store
            .get_member(channel, sender_name, sender_scope.as_handle_segment())?
            .ok_or_else(|| CoreError::PermissionDenied(format!("{sender_name} is not a member of {channel}")))?;
        if !member.can_send {
            return Err(CoreError::PermissionDenied(format!(
                "{sender_name} cannot send to {channel}"
            )));
        }

        let (valid_mentions, invalid_mentions) = self.validate_mentions(channel, content)?;
        if !invalid_mentions.is_empty() {
            tracing::info!(channel, ?invalid_mentions, "dropped invalid mentions from send");
        }
        let metadata = json!({ "mentions": valid_mentions }).to_string();

        let row = self.store.insert_message(
            channel,
            sender_name,
            sender_scope.as_handle_segment(),
            content,
            thread,
            &metadata,
            confidence,
            intent_type,
        )?;
        Ok(row)
    }

    pub fn edit(&self, id: i64, editor_name: &str, editor_scope: &Scope, content: &str) -> CoreResult<MessageRow> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidInput("message content must not be blank".to_string()));
        }
        let existing = self.store.get_message(id)?.ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
        if existing.sender_name != editor_name || existing.sender_scope != editor_scope.as_handle_segment() {
            return Err(CoreError::PermissionDenied("only the original sender may edit".to_string()));
        }
        Ok(self.store.update_message_content(id, content)?)
    }

    pub fn soft_delete(&self, id: i64, actor_name: &str, actor_scope: &Scope) -> CoreResult<()> {
        let existing = self.store.get_message(id)?.ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
        let is_sender = existing.sender_name == actor_name && existing.sender_scope == actor_scope.as_handle_segment();
        let can_manage = self
            .store
            .get_member(&existing.channel, actor_name, actor_scope.as_handle_segment())?
            .is_some_and(|m| m.can_manage);
        if !is_sender && !can_manage {
            return Err(CoreError::PermissionDenied("only the sender or a manager may delete".to_string()));
        }
        self.store.soft_delete_message(id, actor_name)?;
        Ok(())
    }

    pub fn get(&self, id: i64, viewer: Option<(&str, &Scope)>) -> CoreResult<MessageRow> {
        let message = self.store.get_message(id)?.ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
        if let Some((viewer_name, viewer_scope)) = viewer {
            let visible = views::agent_channels(&self.store, viewer_name, viewer_scope)?
                .iter()
                .any(|v| v.channel.handle == message.channel);
            if !visible {
                return Err(CoreError::NotFound(format!("message {id}")));
            }
        }
        Ok(message)
    }

    pub fn list(&self, channel: &str, limit: i64, before_id: Option<i64>) -> CoreResult<Vec<MessageRow>> {
        Ok(self.store.list_messages(channel, limit, before_id)?)
    }
}
