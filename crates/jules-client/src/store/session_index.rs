//! Per-session `session.json` (atomic write) plus a global append-only
//! `sessions.jsonl` index, deduplicated on read by id (last write wins).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{CachedSession, SessionIndexEntry};
use crate::platform::Platform;

pub struct SessionIndexStore {
    root: PathBuf,
    platform: Arc<dyn Platform>,
    /// Serializes appends to the global index; upserts of distinct
    /// `session.json` files may run concurrently.
    index_append_lock: Mutex<()>,
}

impl SessionIndexStore {
    pub fn new(root: PathBuf, platform: Arc<dyn Platform>) -> Self {
        Self {
            root,
            platform,
            index_append_lock: Mutex::new(()),
        }
    }

    fn session_json_path(&self, id: &str) -> PathBuf {
        self.root.join(id).join("session.json")
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("sessions.jsonl")
    }

    pub async fn upsert(&self, cached: &CachedSession) -> Result<()> {
        let bytes = serde_json::to_vec(cached)
            .map_err(|e| Error::json(format!("session {}", cached.resource.id), e))?;
        self.platform
            .write_file_atomic(&self.session_json_path(&cached.resource.id), &bytes)
            .await?;

        let entry = SessionIndexEntry::from(cached);
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| Error::json(format!("index entry {}", entry.id), e))?;
        line.push(b'\n');

        let _guard = self.index_append_lock.lock().await;
        self.platform.append_file(&self.index_path(), &line).await?;
        Ok(())
    }

    /// Parallelizes the `session.json` writes; index appends are serialized
    /// by `upsert`'s own lock so ordering within the log is still well-defined.
    pub async fn upsert_many(&self, cached: &[CachedSession]) -> Result<()> {
        let results = join_all(cached.iter().map(|c| self.upsert(c))).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<CachedSession>> {
        let Some(bytes) = self.platform.read_file(&self.session_json_path(id)).await? else {
            return Ok(None);
        };
        let cached = serde_json::from_slice(&bytes)
            .map_err(|e| Error::json(format!("session {id}"), e))?;
        Ok(Some(cached))
    }

    /// Removes the session directory. The global index is left untouched —
    /// a subsequent `scan_index()` may still surface a stale row until a
    /// later `get()` on that id confirms it's gone.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.platform.remove_dir_all(&self.session_dir(id)).await
    }

    /// Reads the whole index log and deduplicates by id, last write wins.
    pub async fn scan_index(&self) -> Result<Vec<SessionIndexEntry>> {
        let Some(bytes) = self.platform.read_file(&self.index_path()).await? else {
            return Ok(Vec::new());
        };
        let mut by_id: HashMap<String, SessionIndexEntry> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for line in bytes.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<SessionIndexEntry>(line) {
                Ok(entry) => {
                    if !by_id.contains_key(&entry.id) {
                        order.push(entry.id.clone());
                    }
                    by_id.insert(entry.id.clone(), entry);
                }
                Err(_) => tracing::warn!("skipping malformed session index line"),
            }
        }
        Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutomationMode, Session, SessionState};
    use crate::platform::FakePlatform;
    use chrono::Utc;

    fn cached(id: &str) -> CachedSession {
        CachedSession {
            resource: Session {
                id: id.to_string(),
                create_time: Utc::now(),
                update_time: Utc::now(),
                state: SessionState::InProgress,
                prompt: "do the thing".into(),
                title: Some("title".into()),
                source_context: None,
                automation_mode: AutomationMode::Unspecified,
                outputs: vec![],
                url: None,
            },
            last_synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let platform = Arc::new(FakePlatform::new());
        let store = SessionIndexStore::new(PathBuf::from("/cache"), platform);
        store.upsert(&cached("s1")).await.unwrap();
        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.resource.id, "s1");
    }

    #[tokio::test]
    async fn scan_index_dedupes_last_write_wins() {
        let platform = Arc::new(FakePlatform::new());
        let store = SessionIndexStore::new(PathBuf::from("/cache"), platform);
        let mut first = cached("s1");
        store.upsert(&first).await.unwrap();
        first.resource.state = SessionState::Completed;
        store.upsert(&first).await.unwrap();

        let entries = store.scan_index().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, SessionState::Completed);
    }

    #[tokio::test]
    async fn delete_removes_session_but_not_index() {
        let platform = Arc::new(FakePlatform::new());
        let store = SessionIndexStore::new(PathBuf::from("/cache"), platform);
        store.upsert(&cached("s1")).await.unwrap();
        store.delete("s1").await.unwrap();

        assert!(store.get("s1").await.unwrap().is_none());
        assert_eq!(store.scan_index().await.unwrap().len(), 1);
    }
}
