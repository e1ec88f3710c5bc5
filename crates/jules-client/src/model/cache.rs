use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{Session, SessionState};

/// The record stored per session under `.jules/cache/{id}/session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    pub resource: Session,
    pub last_synced_at: DateTime<Utc>,
}

/// Lightweight row appended to the global `sessions.jsonl` index on every
/// upsert. The index is append-only; readers dedupe by `id`, last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub id: String,
    pub title: Option<String>,
    pub state: SessionState,
    pub create_time: DateTime<Utc>,
    pub source: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CachedSession> for SessionIndexEntry {
    fn from(cached: &CachedSession) -> Self {
        SessionIndexEntry {
            id: cached.resource.id.clone(),
            title: cached.resource.title.clone(),
            state: cached.resource.state.clone(),
            create_time: cached.resource.create_time,
            source: cached
                .resource
                .source_context
                .as_ref()
                .map(|s| s.source.clone()),
            updated_at: cached.last_synced_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub last_processed_session_id: String,
    pub sessions_processed: u64,
    pub started_at: DateTime<Utc>,
}
