//! Hybrid search (spec §4.4): lexical full-text matching, always available,
//! plus an optional semantic backend ranked by a weighted blend of
//! similarity, confidence, and recency decay.
//!
//! Ranking profiles and the decay formula (including its clamps) are taken
//! verbatim from this system's distilled design rather than invented here.

use crate::errors::CoreResult;
use crate::ids::Scope;
use crate::store::{MessageRow, Store};
use crate::views;

#[derive(Debug, Clone, Copy)]
pub struct RankingProfile {
    pub half_life_hours: f64,
    pub w_sim: f64,
    pub w_conf: f64,
    pub w_dec: f64,
}

impl RankingProfile {
    pub const RECENT: RankingProfile = RankingProfile { half_life_hours: 24.0, w_sim: 0.3, w_conf: 0.1, w_dec: 0.6 };
    pub const QUALITY: RankingProfile = RankingProfile { half_life_hours: 720.0, w_sim: 0.4, w_conf: 0.5, w_dec: 0.1 };
    pub const BALANCED: RankingProfile = RankingProfile { half_life_hours: 168.0, w_sim: 0.34, w_conf: 0.33, w_dec: 0.33 };
    pub const SIMILARITY: RankingProfile = RankingProfile { half_life_hours: 168.0, w_sim: 1.0, w_conf: 0.0, w_dec: 0.0 };

    pub fn named(name: &str) -> Option<RankingProfile> {
        match name {
            "recent" => Some(Self::RECENT),
            "quality" => Some(Self::QUALITY),
            "balanced" => Some(Self::BALANCED),
            "similarity" => Some(Self::SIMILARITY),
            _ => None,
        }
    }

    pub fn with_half_life_override(mut self, hours: Option<f64>) -> Self {
        if let Some(hours) = hours {
            self.half_life_hours = hours;
        }
        self
    }
}

/// `exp(-ln2 * age_hours / half_life_hours)`, clamped: negative age (future
/// timestamps) saturates to full recency; an age 100x the half-life or
/// beyond saturates to zero rather than underflowing across many calls.
pub fn recency_decay(age_hours: f64, half_life_hours: f64) -> f64 {
    if age_hours < 0.0 {
        return 1.0;
    }
    if half_life_hours <= 0.0 {
        return 0.0;
    }
    let ratio = age_hours / half_life_hours;
    if ratio >= 100.0 {
        return 0.0;
    }
    (-std::f64::consts::LN_2 * ratio).exp()
}

pub fn blended_score(similarity: f64, confidence: f64, recency: f64, profile: RankingProfile) -> f64 {
    let denom = profile.w_sim + profile.w_conf + profile.w_dec;
    if denom <= 0.0 {
        return 0.0;
    }
    (profile.w_sim * similarity + profile.w_conf * confidence + profile.w_dec * recency) / denom
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

#[derive(Debug, Clone)]
pub struct SearchFilters {
    pub channels: Option<Vec<String>>,
    pub senders: Option<Vec<String>>,
    pub intent_type: Option<String>,
    pub min_confidence: Option<f64>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: i64,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            channels: None,
            senders: None,
            intent_type: None,
            min_confidence: None,
            since: None,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankedMessage {
    pub message: MessageRow,
    pub score: f64,
}

pub struct SearchEngine {
    store: Store,
}

impl SearchEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn viewer_channels(&self, viewer_name: &str, viewer_scope: &Scope, filters: &SearchFilters) -> CoreResult<Vec<String>> {
        let member_of: Vec<String> = views::agent_channels(&self.store, viewer_name, viewer_scope)?
            .into_iter()
            .map(|v| v.channel.handle)
            .collect();
        Ok(match &filters.channels {
            Some(wanted) => member_of.into_iter().filter(|c| wanted.contains(c)).collect(),
            None => member_of,
        })
    }

    fn apply_filters(&self, rows: Vec<MessageRow>, filters: &SearchFilters) -> Vec<MessageRow> {
        rows.into_iter()
            .filter(|m| filters.senders.as_ref().is_none_or(|s| s.contains(&m.sender_name)))
            .filter(|m| filters.intent_type.as_deref().is_none_or(|t| m.intent_type.as_deref() == Some(t)))
            .filter(|m| {
                filters
                    .min_confidence
                    .is_none_or(|min| m.confidence.is_some_and(|c| c >= min))
            })
            .filter(|m| {
                filters.since.is_none_or(|since| {
                    chrono::DateTime::parse_from_rfc3339(&m.created_at)
                        .is_ok_and(|ts| ts.with_timezone(&chrono::Utc) >= since)
                })
            })
            .collect()
    }

    /// Always-available lexical backend: substring match over content,
    /// restricted to the viewer's channels, newest first.
    pub fn search_lexical(&self, viewer_name: &str, viewer_scope: &Scope, query: &str, filters: &SearchFilters) -> CoreResult<Vec<MessageRow>> {
        let channels = self.viewer_channels(viewer_name, viewer_scope, filters)?;
        let rows = self.store.search_lexical(&channels, query, filters.limit.max(1) * 4)?;
        let mut filtered = self.apply_filters(rows, filters);
        filtered.truncate(filters.limit.max(0) as usize);
        Ok(filtered)
    }

    /// Semantic backend: blend `similarity`/`confidence`/`recency` per
    /// `profile`. `query_embedding` is the caller-supplied embedding vector
    /// for the query text — embedding generation itself (via the optional
    /// `semantic` feature's model) happens above this layer so the ranking
    /// math stays testable without a model on hand.
    pub fn search_semantic(
        &self,
        viewer_name: &str,
        viewer_scope: &Scope,
        query_embedding: &[f32],
        profile: RankingProfile,
        filters: &SearchFilters,
    ) -> CoreResult<Vec<RankedMessage>> {
        let channels = self.viewer_channels(viewer_name, viewer_scope, filters)?;
        let embeddings = self.store.list_embeddings_in_channels(&channels)?;
        let now = chrono::Utc::now();

        let mut ranked: Vec<RankedMessage> = Vec::new();
        for row in embeddings {
            let similarity = cosine_similarity(query_embedding, &row.embedding);
            let confidence = row.confidence.unwrap_or(0.5);
            let age_hours = chrono::DateTime::parse_from_rfc3339(&row.created_at)
                .map(|ts| (now - ts.with_timezone(&chrono::Utc)).num_seconds() as f64 / 3600.0)
                .unwrap_or(0.0);
            let recency = recency_decay(age_hours, profile.half_life_hours);
            let score = blended_score(similarity, confidence, recency, profile);
            if let Some(message) = self.store.get_message(row.message_id)? {
                ranked.push(RankedMessage { message, score });
            }
        }
        let filtered_messages = self.apply_filters(ranked.iter().map(|r| r.message.clone()).collect(), filters);
        let allowed: std::collections::HashSet<i64> = filtered_messages.iter().map(|m| m.id).collect();
        ranked.retain(|r| allowed.contains(&r.message.id));
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(filters.limit.max(0) as usize);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_decay_clamps_future_to_one() {
        assert_eq!(recency_decay(-5.0, 24.0), 1.0);
    }

    #[test]
    fn recency_decay_clamps_far_past_to_zero() {
        assert_eq!(recency_decay(100.0 * 24.0, 24.0), 0.0);
    }

    #[test]
    fn recency_decay_halves_at_half_life() {
        let decay = recency_decay(24.0, 24.0);
        assert!((decay - 0.5).abs() < 1e-9);
    }

    #[test]
    fn quality_profile_favors_high_confidence_old_message() {
        let old_high_conf = blended_score(0.5, 0.95, recency_decay(720.0, RankingProfile::QUALITY.half_life_hours), RankingProfile::QUALITY);
        let new_low_conf = blended_score(0.5, 0.30, recency_decay(1.0, RankingProfile::QUALITY.half_life_hours), RankingProfile::QUALITY);
        assert!(old_high_conf > new_low_conf);
    }

    #[test]
    fn recent_profile_favors_new_message_over_old() {
        let old_high_conf = blended_score(0.5, 0.95, recency_decay(720.0, RankingProfile::RECENT.half_life_hours), RankingProfile::RECENT);
        let new_low_conf = blended_score(0.5, 0.30, recency_decay(1.0, RankingProfile::RECENT.half_life_hours), RankingProfile::RECENT);
        assert!(new_low_conf > old_high_conf);
    }

    #[test]
    fn similarity_profile_ignores_confidence_and_recency() {
        let score = blended_score(0.8, 0.0, 0.0, RankingProfile::SIMILARITY);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn lexical_search_respects_membership_scope() {
        use crate::store::AccessType;
        let store = Store::open_in_memory().unwrap();
        store
            .create_channel("global:general", "standard", AccessType::Open, "global", "general", "", true, None, None)
            .unwrap();
        store
            .add_member("global:general", "alice", "global", "alice", "direct", true, true, true, false, false)
            .unwrap();
        store
            .insert_message("global:general", "alice", "global", "deploy succeeded", None, "{}", None, None)
            .unwrap();
        let engine = SearchEngine::new(store);
        let filters = SearchFilters { limit: 10, ..Default::default() };
        let hits = engine.search_lexical("alice", &Scope::Global, "deploy", &filters).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = engine.search_lexical("mallory", &Scope::Global, "deploy", &filters).unwrap();
        assert!(hits.is_empty());
    }
}
